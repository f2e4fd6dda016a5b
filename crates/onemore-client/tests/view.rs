mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use common::{FaultyStore, eventually, eventually_within, repo, stores, within};
use onemore_client::names;
use onemore_client::{ClientError, Notice, Repo, RowKey, SessionView, WriteStatus};
use onemore_types::models::{Delta, Session};
use onemore_types::RemoteStore;

async fn owned_session(store: &Arc<FaultyStore>) -> (Repo, Session, SessionView) {
    let owner = repo(store.clone());
    let session = owner.create_session("Friday", &["Ana", "Luis"]).await.unwrap();
    let view = owner.open_view(session.id).await.unwrap();
    (owner, session, view)
}

fn id_of(view: &SessionView, name: &str) -> Uuid {
    view.participants()
        .iter()
        .find(|p| p.display_name == name)
        .and_then(|p| p.key.remote())
        .unwrap_or_else(|| panic!("no confirmed participant named {}", name))
}

fn drink(view: &SessionView, name: &str) -> Uuid {
    view.drink_types()
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.id)
        .unwrap()
}

fn all_confirmed(view: &SessionView) -> bool {
    view.events().iter().all(|e| e.status == WriteStatus::Confirmed)
        && view.participants().iter().all(|p| p.status == WriteStatus::Confirmed)
}

#[tokio::test]
async fn increment_shows_immediately_and_is_confirmed() {
    let (backend, store) = stores();
    let (_owner, session, view) = owned_session(&store).await;
    let (ana, beer) = (id_of(&view, "Ana"), drink(&view, "Cerveza"));

    let gate = store.hold_writes().await;
    let tentative = view.increment(ana, Some(beer)).unwrap();
    assert_eq!(view.count(ana, Some(beer)), 1);
    assert_eq!(view.count(ana, None), 1);
    assert!(view.events().iter().any(|e| e.key == RowKey::Tentative(tentative)));
    assert_eq!(view.pending_writes(), 1);
    drop(gate);

    view.settle().await;
    assert!(eventually(|| all_confirmed(&view)).await);
    assert_eq!(view.count(ana, Some(beer)), 1);
    assert_eq!(backend.list_drink_events(session.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_write_is_rolled_back_with_a_notice() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;
    let (ana, beer) = (id_of(&view, "Ana"), drink(&view, "Cerveza"));

    for _ in 0..3 {
        view.increment(ana, Some(beer)).unwrap();
    }
    view.settle().await;
    assert!(eventually(|| all_confirmed(&view)).await);
    assert_eq!(view.count(ana, Some(beer)), 3);

    let gate = store.hold_writes().await;
    store.fail_events(true);
    let tentative = view.increment(ana, Some(beer)).unwrap();
    assert_eq!(view.count(ana, Some(beer)), 4);
    drop(gate);

    match within(view.next_notice()).await {
        Some(Notice::WriteRolledBack { tentative: t, participant_id, .. }) => {
            assert_eq!(t, tentative);
            assert_eq!(participant_id, ana);
        }
        other => panic!("expected a rollback notice, got {:?}", other),
    }
    assert_eq!(view.count(ana, Some(beer)), 3);
    assert!(!view.events().iter().any(|e| e.key.is_tentative()));
}

#[tokio::test]
async fn decrement_can_go_below_zero() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;
    let (luis, soft) = (id_of(&view, "Luis"), drink(&view, "Refresco"));

    view.decrement(luis, Some(soft)).unwrap();
    view.settle().await;
    assert!(eventually(|| all_confirmed(&view)).await);
    assert_eq!(view.count(luis, Some(soft)), -1);
}

#[tokio::test]
async fn tentative_participant_keeps_its_color() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;

    let tentative = view.add_participant(None).unwrap();
    assert_eq!(view.color_of(tentative), Some(2));
    let card = view
        .snapshot()
        .participants
        .into_iter()
        .find(|c| c.key == RowKey::Tentative(tentative))
        .unwrap();
    assert!(card.pending);
    assert_eq!(card.color_index, 2);

    view.settle().await;

    let expected = names::next_name(&["Ana", "Luis"]);
    let confirmed = id_of(&view, &expected);
    assert_eq!(view.color_of(confirmed), Some(2));
    assert_eq!(view.color_of(tentative), None);
    assert!(view.participants().iter().all(|p| !p.key.is_tentative()));
}

#[tokio::test]
async fn rapid_participant_adds_get_distinct_names_and_colors() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;

    let gate = store.hold_writes().await;
    let first = view.add_participant(None).unwrap();
    let second = view.add_participant(None).unwrap();
    assert_ne!(first, second);
    assert_eq!(view.color_of(first), Some(2));
    assert_eq!(view.color_of(second), Some(3));

    let pending: Vec<String> = view
        .participants()
        .iter()
        .filter(|p| p.key.is_tentative())
        .map(|p| p.display_name.clone())
        .collect();
    assert_eq!(pending.len(), 2);
    assert_ne!(pending[0], pending[1]);
    drop(gate);

    view.settle().await;

    let participants = view.participants();
    assert_eq!(participants.len(), 4);
    assert!(participants.iter().all(|p| !p.key.is_tentative()));
    let colors: BTreeSet<u32> = participants
        .iter()
        .filter_map(|p| view.color_of(p.key))
        .collect();
    assert_eq!(colors, BTreeSet::from([0, 1, 2, 3]));
    for name in &pending {
        id_of(&view, name);
    }
}

#[tokio::test]
async fn concurrent_views_converge_on_the_store() {
    let (backend, store) = stores();
    let (_owner, session, owner_view) = owned_session(&store).await;
    let guest = repo(store.clone());
    let (_, marta) = guest.join_session(&session.invite_code, "Marta").await.unwrap();
    let guest_view = guest.open_view(session.id).await.unwrap();
    owner_view.reload().await.unwrap();

    let (ana, luis) = (id_of(&owner_view, "Ana"), id_of(&owner_view, "Luis"));
    let (beer, cocktail) = (drink(&owner_view, "Cerveza"), drink(&owner_view, "Copa"));

    for i in 0..12 {
        owner_view.increment(ana, Some(beer)).unwrap();
        if i % 3 == 0 {
            owner_view.decrement(luis, Some(cocktail)).unwrap();
        }
        guest_view.increment(marta.id, Some(cocktail)).unwrap();
        if i % 4 == 0 {
            guest_view.increment(luis, Some(beer)).unwrap();
        }
    }

    owner_view.settle().await;
    guest_view.settle().await;
    owner_view.reload().await.unwrap();
    guest_view.reload().await.unwrap();

    let stored = backend.list_drink_events(session.id).await.unwrap();
    for participant in [ana, luis, marta.id] {
        for drink_type in [beer, cocktail] {
            let expected: i64 = stored
                .iter()
                .filter(|e| e.target_participant_id == participant && e.drink_type_id == drink_type)
                .map(|e| e.delta.value())
                .sum();
            assert_eq!(owner_view.count(participant, Some(drink_type)), expected);
            assert_eq!(guest_view.count(participant, Some(drink_type)), expected);
        }
    }
    assert_eq!(owner_view.count(ana, Some(beer)), 12);
    assert_eq!(guest_view.count(marta.id, None), 12);
    assert!(all_confirmed(&owner_view));
    assert!(all_confirmed(&guest_view));
}

#[tokio::test]
async fn only_the_owner_adds_participants() {
    let (_backend, store) = stores();
    let (_owner, session, _view) = owned_session(&store).await;
    let guest = repo(store.clone());
    let guest_view = guest.open_view(session.id).await.unwrap();

    assert!(!guest_view.snapshot().is_owner);
    assert!(matches!(guest_view.add_participant(None), Err(ClientError::NotOwner)));
}

#[tokio::test]
async fn claimed_user_counts_only_for_their_participant() {
    let (_backend, store) = stores();
    let (owner, session, owner_view) = owned_session(&store).await;
    let (ana, luis, beer) = (id_of(&owner_view, "Ana"), id_of(&owner_view, "Luis"), drink(&owner_view, "Cerveza"));

    let guest = repo(store.clone());
    guest.claim_participant(luis).await.unwrap();
    owner.claim_participant(ana).await.unwrap();
    let guest_view = guest.open_view(session.id).await.unwrap();
    owner_view.reload().await.unwrap();

    assert_eq!(guest_view.snapshot().current_participant_id, Some(luis));
    assert!(matches!(guest_view.increment(ana, Some(beer)), Err(ClientError::NotPermitted)));
    guest_view.increment(luis, Some(beer)).unwrap();

    // The owner counts for anyone, claimed or not.
    owner_view.increment(luis, Some(beer)).unwrap();
    owner_view.increment(ana, Some(beer)).unwrap();

    guest_view.settle().await;
    owner_view.settle().await;
    owner_view.reload().await.unwrap();
    assert_eq!(owner_view.count(luis, Some(beer)), 2);
    assert_eq!(owner_view.count(ana, Some(beer)), 1);
}

#[tokio::test]
async fn pending_and_unknown_participants_are_rejected() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;
    let beer = drink(&view, "Cerveza");

    let gate = store.hold_writes().await;
    let tentative = view.add_participant(Some("Marta")).unwrap();
    assert!(matches!(
        view.increment(tentative, Some(beer)),
        Err(ClientError::ParticipantPending(_))
    ));
    assert!(matches!(
        view.increment(Uuid::new_v4(), Some(beer)),
        Err(ClientError::UnknownParticipant(_))
    ));
    drop(gate);

    view.settle().await;
    let marta = id_of(&view, "Marta");
    view.increment(marta, Some(beer)).unwrap();
}

#[tokio::test]
async fn drink_type_must_be_resolvable() {
    let (_backend, store) = stores();
    let (owner, session, view) = owned_session(&store).await;
    let ana = id_of(&view, "Ana");

    assert!(matches!(view.increment(ana, None), Err(ClientError::DrinkTypeRequired)));
    let missing = Uuid::new_v4();
    assert!(matches!(
        view.increment(ana, Some(missing)),
        Err(ClientError::UnknownDrinkType(id)) if id == missing
    ));

    owner.delete_drink_type(session.id, drink(&view, "Refresco")).await.unwrap();
    owner.delete_drink_type(session.id, drink(&view, "Copa")).await.unwrap();
    view.reload().await.unwrap();
    view.increment(ana, None).unwrap();
    view.settle().await;
    assert!(eventually(|| all_confirmed(&view)).await);
    assert_eq!(view.count(ana, None), 1);

    owner.delete_drink_type(session.id, drink(&view, "Cerveza")).await.unwrap();
    view.reload().await.unwrap();
    assert!(matches!(view.increment(ana, None), Err(ClientError::NoDrinkTypes)));
}

#[tokio::test]
async fn remote_activity_is_marked_then_expires() {
    let (_backend, store) = stores();
    let (_owner, session, view) = owned_session(&store).await;
    let (ana, beer) = (id_of(&view, "Ana"), drink(&view, "Cerveza"));

    let guest = repo(store.clone());
    guest.add_drink_event(session.id, ana, beer, Delta::Increment).await.unwrap();

    assert!(eventually(|| view.activity(ana).is_some()).await);
    assert_eq!(view.count(ana, Some(beer)), 1);
    let card = view
        .snapshot()
        .participants
        .into_iter()
        .find(|c| c.key == RowKey::Remote(ana))
        .unwrap();
    assert_eq!(card.activity.map(|a| a.count), Some(1));

    assert!(eventually_within(Duration::from_secs(4), || view.activity(ana).is_none()).await);
    assert_eq!(view.count(ana, Some(beer)), 1);
}

#[tokio::test]
async fn own_taps_during_reloads_are_not_marked_as_activity() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;
    let (ana, beer) = (id_of(&view, "Ana"), drink(&view, "Cerveza"));

    for n in 1..=10 {
        view.increment(ana, Some(beer)).unwrap();
        let (reloaded, _) = tokio::join!(view.reload(), view.settle());
        reloaded.unwrap();
        assert!(view.count(ana, Some(beer)) >= n);
    }

    assert!(eventually(|| all_confirmed(&view)).await);
    assert_eq!(view.count(ana, Some(beer)), 10);
    assert!(view.activity(ana).is_none());
}

#[tokio::test]
async fn deleting_the_session_stops_the_view() {
    let (_backend, store) = stores();
    let (owner, session, _owner_view) = owned_session(&store).await;
    let guest = repo(store.clone());
    let guest_view = guest.open_view(session.id).await.unwrap();
    let ana = id_of(&guest_view, "Ana");

    owner.delete_session(session.id).await.unwrap();

    assert_eq!(within(guest_view.next_notice()).await, Some(Notice::SessionDeleted));
    assert!(eventually(|| guest_view.is_closed()).await);
    assert!(matches!(guest_view.increment(ana, None), Err(ClientError::Closed)));
    assert!(matches!(guest_view.reload().await, Err(ClientError::Closed)));
}

#[tokio::test]
async fn closing_ends_the_subscriptions() {
    let (backend, store) = stores();
    let owner = repo(store.clone());
    let session = owner.create_session("Friday", &["Ana"]).await.unwrap();
    let before = backend.dispatcher().subscriber_count();

    let view = owner.open_view(session.id).await.unwrap();
    assert_eq!(backend.dispatcher().subscriber_count(), before + 4);

    view.close();
    assert!(view.is_closed());
    assert!(eventually(|| backend.dispatcher().subscriber_count() == before).await);

    let dropped = owner.open_view(session.id).await.unwrap();
    drop(dropped);
    assert!(eventually(|| backend.dispatcher().subscriber_count() == before).await);
}

#[tokio::test]
async fn duplicate_participant_response_converges_quietly() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;

    store.duplicate_after_insert(true);
    let tentative = view.add_participant(Some("Marta")).unwrap();
    view.settle().await;

    let martas: Vec<_> = view
        .participants()
        .into_iter()
        .filter(|p| p.display_name == "Marta")
        .collect();
    assert_eq!(martas.len(), 1);
    assert!(!martas[0].key.is_tentative());
    assert_eq!(view.color_of(martas[0].key), Some(2));
    assert_eq!(view.color_of(tentative), None);
    assert_eq!(view.try_notice(), None);
}

#[tokio::test]
async fn existing_name_does_not_leave_a_ghost() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;

    view.add_participant(Some("Ana")).unwrap();
    view.settle().await;

    let participants = view.participants();
    assert_eq!(participants.len(), 2);
    assert!(participants.iter().all(|p| !p.key.is_tentative()));
    assert_eq!(view.try_notice(), None);
}

#[tokio::test]
async fn failed_participant_write_is_removed() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;

    store.fail_participants(true);
    let tentative = view.add_participant(Some("Marta")).unwrap();

    match within(view.next_notice()).await {
        Some(Notice::ParticipantRolledBack { tentative: t, display_name, .. }) => {
            assert_eq!(t, tentative);
            assert_eq!(display_name, "Marta");
        }
        other => panic!("expected a participant rollback, got {:?}", other),
    }
    assert_eq!(view.participants().len(), 2);
    assert_eq!(view.color_of(tentative), None);
}

#[tokio::test]
async fn blank_names_are_rejected() {
    let (_backend, store) = stores();
    let (_owner, _session, view) = owned_session(&store).await;
    assert!(matches!(view.add_participant(Some("   ")), Err(ClientError::InvalidName)));
}
