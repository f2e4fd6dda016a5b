use anyhow::{Context, anyhow, bail};
use tracing::warn;
use uuid::Uuid;

use onemore_client::balances::{self, format_eur};
use onemore_client::{Direction, Notice, Repo, SessionData};
use onemore_types::models::{Delta, DrinkType, Participant};

pub const USAGE: &str = "usage: onemore <command>

  create <name> [participant...]       start a session
  join <code> <name>                   join by invite code
  claim <session> <participant>        claim a participant slot
  sessions                             list your sessions
  show <session>                       participants and counts
  add <session> <participant> [drink]  count one drink
  undo <session> <participant> [drink] take one drink back
  balances <session>                   what everyone owes
  price <session> <drink> <price>      set a drink price, e.g. 2,50
  move <session> <drink> up|down       reorder drink types
  link <session>                       print the invite link
  delete <session>                     delete a session (owner only)";

pub enum Command {
    Create { name: String, participants: Vec<String> },
    Join { code: String, name: String },
    Claim { session: Uuid, participant: String },
    Sessions,
    Show { session: Uuid },
    Tally { session: Uuid, participant: String, drink: Option<String>, delta: Delta },
    Balances { session: Uuid },
    Price { session: Uuid, drink: String, price: String },
    Move { session: Uuid, drink: String, direction: Direction },
    Link { session: Uuid },
    Delete { session: Uuid },
}

impl Command {
    pub fn parse(args: &[String]) -> anyhow::Result<Self> {
        let (name, rest) = args.split_first().ok_or_else(|| anyhow!("missing command"))?;
        let arg = |i: usize, what: &str| -> anyhow::Result<String> {
            rest.get(i).cloned().ok_or_else(|| anyhow!("missing {}", what))
        };
        let session = || -> anyhow::Result<Uuid> {
            let raw = arg(0, "session id")?;
            raw.parse().with_context(|| format!("invalid session id {}", raw))
        };

        let command = match name.as_str() {
            "create" => Self::Create {
                name: arg(0, "session name")?,
                participants: rest.iter().skip(1).cloned().collect(),
            },
            "join" => Self::Join {
                code: arg(0, "invite code")?,
                name: arg(1, "your name")?,
            },
            "claim" => Self::Claim {
                session: session()?,
                participant: arg(1, "participant")?,
            },
            "sessions" => Self::Sessions,
            "show" => Self::Show { session: session()? },
            "add" | "undo" => Self::Tally {
                session: session()?,
                participant: arg(1, "participant")?,
                drink: rest.get(2).cloned(),
                delta: if name.as_str() == "add" { Delta::Increment } else { Delta::Decrement },
            },
            "balances" => Self::Balances { session: session()? },
            "price" => Self::Price {
                session: session()?,
                drink: arg(1, "drink")?,
                price: arg(2, "price")?,
            },
            "move" => Self::Move {
                session: session()?,
                drink: arg(1, "drink")?,
                direction: match arg(2, "direction")?.as_str() {
                    "up" => Direction::Up,
                    "down" => Direction::Down,
                    other => bail!("direction must be up or down, not {}", other),
                },
            },
            "link" => Self::Link { session: session()? },
            "delete" => Self::Delete { session: session()? },
            other => bail!("unknown command {}", other),
        };
        Ok(command)
    }

    pub async fn run(self, repo: &Repo) -> anyhow::Result<()> {
        match self {
            Self::Create { name, participants } => {
                let session = repo.create_session(&name, &participants).await?;
                println!("{}  {}  {}", session.id, session.invite_code, session.name);
                println!("{}", repo.invite_link(&session.invite_code));
            }
            Self::Join { code, name } => {
                let (session, participant) = repo.join_session(&code, &name).await?;
                println!("joined {} as {} ({})", session.name, participant.display_name, session.id);
            }
            Self::Claim { session, participant } => {
                let data = repo.load_session_data(session).await?;
                let target = find_participant(&data, &participant)?;
                let claimed = repo.claim_participant(target.id).await?;
                println!("you are {}", claimed.display_name);
            }
            Self::Sessions => {
                for s in repo.list_sessions().await? {
                    println!("{}  {}  {}  {}", s.id, s.invite_code, s.created_at.format("%Y-%m-%d %H:%M"), s.name);
                }
            }
            Self::Show { session } => show(repo, session).await?,
            Self::Tally { session, participant, drink, delta } => {
                tally(repo, session, &participant, drink.as_deref(), delta).await?
            }
            Self::Balances { session } => {
                let data = repo.load_session_data(session).await?;
                let bills = balances::bills(&data.participants, &data.drink_types, &data.events);
                for bill in &bills {
                    println!("{:<16} {:>3} drinks  {:>10}", bill.display_name, bill.total_drinks, format_eur(bill.amount_cents));
                    for line in bill.lines.iter().filter(|l| l.count != 0) {
                        println!("    {} {:<12} {:>3} x {:>8}", line.emoji, line.name, line.count, format_eur(line.price_cents));
                    }
                }
                println!("total {}", format_eur(balances::session_total(&bills)));
            }
            Self::Price { session, drink, price } => {
                let data = repo.load_session_data(session).await?;
                let target = find_drink(&data.drink_types, &drink)?;
                let written = repo.save_prices(session, &[(target.id, price)]).await?;
                if written == 0 {
                    println!("{} price unchanged", target.name);
                }
            }
            Self::Move { session, drink, direction } => {
                let data = repo.load_session_data(session).await?;
                let target = find_drink(&data.drink_types, &drink)?;
                repo.reorder_drink_type(session, target.id, direction).await?;
            }
            Self::Link { session } => {
                let data = repo.load_session_data(session).await?;
                println!("{}", repo.invite_link(&data.invite_code));
            }
            Self::Delete { session } => repo.delete_session(session).await?,
        }
        Ok(())
    }
}

async fn show(repo: &Repo, session: Uuid) -> anyhow::Result<()> {
    let view = repo.open_view(session).await?;
    let snapshot = view.snapshot();
    if let Some(s) = &snapshot.session {
        println!("{}  ({})", s.name, s.invite_code);
    }

    for card in &snapshot.participants {
        let me = card.key.remote().is_some() && card.key.remote() == snapshot.current_participant_id;
        println!(
            "{} {:<16} {:>3}  {}",
            if me { "*" } else { " " },
            card.display_name,
            card.total,
            card.color
        );
        if let Some(id) = card.key.remote() {
            for d in &snapshot.drink_types {
                let n = view.count(id, Some(d.id));
                if n != 0 {
                    println!("      {} {:<12} {:>3}", d.emoji, d.name, n);
                }
            }
        }
    }

    view.close();
    Ok(())
}

async fn tally(repo: &Repo, session: Uuid, participant: &str, drink: Option<&str>, delta: Delta) -> anyhow::Result<()> {
    let view = repo.open_view(session).await?;
    let drink_type = drink
        .map(|name| find_drink(&view.drink_types(), name).map(|d| d.id))
        .transpose()?;
    let target = view
        .participants()
        .into_iter()
        .find(|p| p.display_name.eq_ignore_ascii_case(participant))
        .ok_or_else(|| anyhow!("no participant named {}", participant))?;

    view.add_drink(target.key, drink_type, delta)?;
    view.settle().await;

    let mut failed = false;
    while let Some(notice) = view.try_notice() {
        if let Notice::WriteRolledBack { reason, .. } = &notice {
            failed = true;
            warn!("Drink was not saved: {}", reason);
        }
    }
    let total = view.count(target.key, drink_type);
    view.close();

    if failed {
        bail!("drink was not saved");
    }
    println!("{} {}", target.display_name, total);
    Ok(())
}

fn find_participant<'a>(data: &'a SessionData, name: &str) -> anyhow::Result<&'a Participant> {
    data.participants
        .iter()
        .find(|p| p.display_name.eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("no participant named {}", name))
}

fn find_drink<'a>(drink_types: &'a [DrinkType], name: &str) -> anyhow::Result<&'a DrinkType> {
    drink_types
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("no drink type named {}", name))
}
