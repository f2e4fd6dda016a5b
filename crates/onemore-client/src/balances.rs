//! Per-participant bills computed from the drink ledger.

use std::collections::HashMap;

use uuid::Uuid;

use onemore_types::models::{DrinkEvent, DrinkType, DrinkTypePatch, Participant};

/// Highest price a user can enter: €1,000,000.00.
pub const MAX_PRICE_CENTS: i64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillLine {
    pub drink_type_id: Uuid,
    pub name: String,
    pub emoji: String,
    pub count: i64,
    pub price_cents: i64,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bill {
    pub participant_id: Uuid,
    pub display_name: String,
    pub total_drinks: i64,
    /// One line per drink type, in drink type order.
    pub lines: Vec<BillLine>,
    pub amount_cents: i64,
}

/// Bills for every participant, in participant order.
pub fn bills(participants: &[Participant], drink_types: &[DrinkType], events: &[DrinkEvent]) -> Vec<Bill> {
    let mut counts: HashMap<(Uuid, Uuid), i64> = HashMap::new();
    for e in events {
        *counts
            .entry((e.target_participant_id, e.drink_type_id))
            .or_default() += e.delta.value();
    }

    participants
        .iter()
        .map(|p| {
            let lines: Vec<BillLine> = drink_types
                .iter()
                .map(|d| {
                    let count = counts.get(&(p.id, d.id)).copied().unwrap_or(0);
                    BillLine {
                        drink_type_id: d.id,
                        name: d.name.clone(),
                        emoji: d.emoji.clone(),
                        count,
                        price_cents: d.price_cents,
                        amount_cents: count.saturating_mul(d.price_cents),
                    }
                })
                .collect();

            Bill {
                participant_id: p.id,
                display_name: p.display_name.clone(),
                total_drinks: lines.iter().map(|l| l.count).sum(),
                amount_cents: saturating_sum(lines.iter().map(|l| l.amount_cents)),
                lines,
            }
        })
        .collect()
}

pub fn session_total(bills: &[Bill]) -> i64 {
    saturating_sum(bills.iter().map(|b| b.amount_cents))
}

fn saturating_sum(amounts: impl Iterator<Item = i64>) -> i64 {
    amounts.fold(0, i64::saturating_add)
}

/// Parse a price typed by the user (`2,50`, `2.5`, `3`) into cents.
/// Negative, unparseable or out of range input is zero.
pub fn parse_price(text: &str) -> i64 {
    let normalized = text.trim().replace(',', ".");
    let cents = match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => (value * 100.0).round(),
        _ => return 0,
    };
    if cents > MAX_PRICE_CENTS as f64 {
        return 0;
    }
    cents as i64
}

/// `1250` -> `€12.50`.
pub fn format_eur(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("€{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// The update to write when a price field is saved, or `None` if the price
/// did not change.
pub fn price_patch(drink_type: &DrinkType, text: &str) -> Option<DrinkTypePatch> {
    let price_cents = parse_price(text);
    (price_cents != drink_type.price_cents).then(|| DrinkTypePatch {
        price_cents: Some(price_cents),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use onemore_types::models::{Delta, DrinkCategory};

    fn drink(name: &str, price_cents: i64) -> DrinkType {
        DrinkType {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            name: name.into(),
            category: DrinkCategory::Beer,
            price_cents,
            emoji: "🍺".into(),
            sort_order: 0,
            created_at: Utc::now(),
        }
    }

    fn person(name: &str) -> Participant {
        Participant {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            display_name: name.into(),
            claimed_by_user_id: None,
            color_index: None,
            created_at: Utc::now(),
        }
    }

    fn event(p: &Participant, d: &DrinkType, delta: Delta) -> DrinkEvent {
        DrinkEvent {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            actor_user_id: Uuid::nil(),
            target_participant_id: p.id,
            drink_type_id: d.id,
            delta,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn multiplies_counts_by_price() {
        let (beer, cocktail) = (drink("Cerveza", 300), drink("Copa", 800));
        let (ana, luis) = (person("Ana"), person("Luis"));
        let events = vec![
            event(&ana, &beer, Delta::Increment),
            event(&ana, &beer, Delta::Increment),
            event(&ana, &beer, Delta::Increment),
            event(&ana, &beer, Delta::Decrement),
            event(&ana, &cocktail, Delta::Increment),
            event(&luis, &cocktail, Delta::Increment),
        ];

        let bills = bills(&[ana.clone(), luis.clone()], &[beer.clone(), cocktail.clone()], &events);
        assert_eq!(bills[0].total_drinks, 3);
        assert_eq!(bills[0].lines[0].count, 2);
        assert_eq!(bills[0].amount_cents, 2 * 300 + 800);
        assert_eq!(bills[1].lines[0].count, 0);
        assert_eq!(bills[1].amount_cents, 800);
        assert_eq!(session_total(&bills), 2200);
    }

    #[test]
    fn price_parsing() {
        assert_eq!(parse_price("2,50"), 250);
        assert_eq!(parse_price("2.5"), 250);
        assert_eq!(parse_price(" 3 "), 300);
        assert_eq!(parse_price("0,99"), 99);
        assert_eq!(parse_price("-4"), 0);
        assert_eq!(parse_price("abc"), 0);
        assert_eq!(parse_price(""), 0);
    }

    #[test]
    fn out_of_range_prices_are_zero() {
        assert_eq!(parse_price("1e17"), 0);
        assert_eq!(parse_price("1000000,01"), 0);
        assert_eq!(parse_price("1000000"), MAX_PRICE_CENTS);
    }

    #[test]
    fn huge_stored_prices_saturate() {
        // Rows written by other clients are not bound by the parser
        let (gold, beer) = (drink("Oro", i64::MAX), drink("Cerveza", 300));
        let (ana, luis) = (person("Ana"), person("Luis"));
        let events = vec![
            event(&ana, &gold, Delta::Increment),
            event(&ana, &gold, Delta::Increment),
            event(&ana, &beer, Delta::Increment),
            event(&luis, &gold, Delta::Increment),
        ];

        let bills = bills(&[ana, luis], &[gold, beer], &events);
        assert_eq!(bills[0].lines[0].amount_cents, i64::MAX);
        assert_eq!(bills[0].amount_cents, i64::MAX);
        assert_eq!(bills[1].amount_cents, i64::MAX);
        assert_eq!(session_total(&bills), i64::MAX);
    }

    #[test]
    fn euro_formatting() {
        assert_eq!(format_eur(1250), "€12.50");
        assert_eq!(format_eur(5), "€0.05");
        assert_eq!(format_eur(0), "€0.00");
        assert_eq!(format_eur(-150), "€-1.50");
    }

    #[test]
    fn unchanged_price_is_not_written() {
        let beer = drink("Cerveza", 300);
        assert!(price_patch(&beer, "3,00").is_none());
        assert_eq!(price_patch(&beer, "3,5").and_then(|p| p.price_cents), Some(350));
    }
}
