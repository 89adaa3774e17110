//! Due-date calculator for recurring templates.
//!
//! Everything here is pure: no clock, no storage. The server calls
//! [`advance`] after each generated transaction and is the only writer of
//! `next_due_date` and `last_generated_date`.

use api_types::{
    Record,
    expense::{Expense, ExpenseNew},
    income::{Income, IncomeNew},
    recurring::{Frequency, GeneratedTransaction, RecurringTemplate, TemplateKind},
};
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};

/// Upper bound on occurrences generated for one template in one batch.
pub const MAX_CATCH_UP: usize = 366;

fn days_in_month(year: i32, month: u32) -> u32 {
    (28..=31)
        .rev()
        .find(|day| NaiveDate::from_ymd_opt(year, month, *day).is_some())
        .unwrap_or(28)
}

fn clamped(year: i32, month: u32, anchor: u32) -> Option<NaiveDate> {
    let day = anchor.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Occurrence following `current`.
///
/// Monthly and yearly steps land on `day_of_month` (or `current`'s day)
/// clamped to the length of the target month, so Jan 31 goes to Feb 29 in
/// a leap year and back to Mar 31 afterwards.
pub fn next_due_date(
    frequency: Frequency,
    day_of_month: Option<u32>,
    current: NaiveDate,
) -> Option<NaiveDate> {
    let anchor = day_of_month.unwrap_or_else(|| current.day());
    match frequency {
        Frequency::Daily => current.checked_add_days(Days::new(1)),
        Frequency::Weekly => current.checked_add_days(Days::new(7)),
        Frequency::Monthly => {
            let (year, month) = match current.month() {
                12 => (current.year().checked_add(1)?, 1),
                month => (current.year(), month + 1),
            };
            clamped(year, month, anchor)
        }
        Frequency::Yearly => clamped(current.year().checked_add(1)?, current.month(), anchor),
    }
}

/// Records a generation on `generated_on` and moves to the next occurrence.
///
/// A template whose next occurrence falls after its `end_date` is
/// deactivated; `next_due_date` still moves so it never fires again.
pub fn advance(template: &mut RecurringTemplate, generated_on: NaiveDate) {
    template.last_generated_date = Some(generated_on);
    match next_due_date(
        template.frequency,
        template.day_of_month,
        template.next_due_date,
    ) {
        Some(next) => {
            template.next_due_date = next;
            if template.end_date.is_some_and(|end| next > end) {
                template.active = false;
            }
        }
        None => template.active = false,
    }
}

/// Every occurrence of an active template due on or before `today`, oldest
/// first, bounded by `end_date` and [`MAX_CATCH_UP`].
pub fn due_occurrences(template: &RecurringTemplate, today: NaiveDate) -> Vec<NaiveDate> {
    let mut due = Vec::new();
    if !template.active {
        return due;
    }
    let mut cursor = Some(template.next_due_date);
    while let Some(date) = cursor {
        if date > today || template.end_date.is_some_and(|end| date > end) {
            break;
        }
        if due.len() == MAX_CATCH_UP {
            break;
        }
        due.push(date);
        cursor = next_due_date(template.frequency, template.day_of_month, date);
    }
    due
}

/// Idempotency key of the transaction generated for one occurrence.
pub fn occurrence_local_id(template_id: &str, occurrence: NaiveDate) -> String {
    format!("recurring_{template_id}_{occurrence}")
}

/// Builds the concrete transaction of one occurrence, dated at midnight UTC
/// of the occurrence.
pub fn materialize(
    template: &RecurringTemplate,
    occurrence: NaiveDate,
    id: String,
    now: DateTime<Utc>,
) -> GeneratedTransaction {
    let date = occurrence.and_time(NaiveTime::MIN).and_utc();
    let local_id = Some(occurrence_local_id(&template.id, occurrence));
    match template.kind {
        TemplateKind::Expense => GeneratedTransaction::Expense(Expense::from_draft(
            id,
            ExpenseNew {
                amount_minor: template.amount_minor,
                category: template.category.clone(),
                description: template.description.clone(),
                payment_method: None,
                date,
            },
            local_id,
            now,
        )),
        TemplateKind::Income => GeneratedTransaction::Income(Income::from_draft(
            id,
            IncomeNew {
                amount_minor: template.amount_minor,
                source: template.category.clone(),
                description: template.description.clone(),
                date,
            },
            local_id,
            now,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn template(frequency: Frequency, day_of_month: Option<u32>, next: NaiveDate) -> RecurringTemplate {
        let now = Utc::now();
        RecurringTemplate {
            id: "tpl-1".to_string(),
            kind: TemplateKind::Expense,
            amount_minor: 4_500,
            category: "rent".to_string(),
            description: Some("flat".to_string()),
            frequency,
            day_of_month,
            start_date: next,
            end_date: None,
            next_due_date: next,
            last_generated_date: None,
            active: true,
            local_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn daily_and_weekly_add_fixed_days() {
        assert_eq!(
            next_due_date(Frequency::Daily, None, date(2024, 2, 28)),
            Some(date(2024, 2, 29))
        );
        assert_eq!(
            next_due_date(Frequency::Daily, None, date(2023, 12, 31)),
            Some(date(2024, 1, 1))
        );
        assert_eq!(
            next_due_date(Frequency::Weekly, None, date(2024, 12, 28)),
            Some(date(2025, 1, 4))
        );
    }

    #[test]
    fn monthly_clamps_then_recovers_the_anchor_day() {
        let feb = next_due_date(Frequency::Monthly, Some(31), date(2024, 1, 31)).unwrap();
        assert_eq!(feb, date(2024, 2, 29));
        let mar = next_due_date(Frequency::Monthly, Some(31), feb).unwrap();
        assert_eq!(mar, date(2024, 3, 31));
        let apr = next_due_date(Frequency::Monthly, Some(31), mar).unwrap();
        assert_eq!(apr, date(2024, 4, 30));
    }

    #[test]
    fn monthly_clamps_to_28_outside_leap_years() {
        assert_eq!(
            next_due_date(Frequency::Monthly, Some(30), date(2023, 1, 30)),
            Some(date(2023, 2, 28))
        );
    }

    #[test]
    fn monthly_without_anchor_uses_current_day() {
        assert_eq!(
            next_due_date(Frequency::Monthly, None, date(2024, 5, 15)),
            Some(date(2024, 6, 15))
        );
    }

    #[test]
    fn monthly_rolls_over_the_year() {
        assert_eq!(
            next_due_date(Frequency::Monthly, Some(31), date(2024, 12, 31)),
            Some(date(2025, 1, 31))
        );
    }

    #[test]
    fn yearly_leap_day_clamps_and_returns() {
        let first = next_due_date(Frequency::Yearly, Some(29), date(2024, 2, 29)).unwrap();
        assert_eq!(first, date(2025, 2, 28));
        let second = next_due_date(Frequency::Yearly, Some(29), first).unwrap();
        assert_eq!(second, date(2026, 2, 28));
        let leap = next_due_date(Frequency::Yearly, Some(29), date(2027, 2, 28)).unwrap();
        assert_eq!(leap, date(2028, 2, 29));
    }

    #[test]
    fn advance_records_generation_and_moves_due_date() {
        let mut tpl = template(Frequency::Monthly, Some(31), date(2024, 1, 31));
        advance(&mut tpl, date(2024, 1, 31));

        assert_eq!(tpl.last_generated_date, Some(date(2024, 1, 31)));
        assert_eq!(tpl.next_due_date, date(2024, 2, 29));
        assert!(tpl.active);
    }

    #[test]
    fn advance_past_end_date_deactivates() {
        let mut tpl = template(Frequency::Weekly, None, date(2024, 3, 1));
        tpl.end_date = Some(date(2024, 3, 5));
        advance(&mut tpl, date(2024, 3, 1));

        assert_eq!(tpl.next_due_date, date(2024, 3, 8));
        assert!(!tpl.active);
    }

    #[test]
    fn due_occurrences_catch_up_until_today() {
        let tpl = template(Frequency::Weekly, None, date(2024, 3, 1));
        assert_eq!(
            due_occurrences(&tpl, date(2024, 3, 20)),
            vec![date(2024, 3, 1), date(2024, 3, 8), date(2024, 3, 15)]
        );
        assert!(due_occurrences(&tpl, date(2024, 2, 29)).is_empty());
    }

    #[test]
    fn due_occurrences_respect_end_date_and_pause() {
        let mut tpl = template(Frequency::Daily, None, date(2024, 3, 1));
        tpl.end_date = Some(date(2024, 3, 2));
        assert_eq!(due_occurrences(&tpl, date(2024, 3, 10)).len(), 2);

        tpl.active = false;
        assert!(due_occurrences(&tpl, date(2024, 3, 10)).is_empty());
    }

    #[test]
    fn due_occurrences_are_capped() {
        let tpl = template(Frequency::Daily, None, date(2000, 1, 1));
        assert_eq!(due_occurrences(&tpl, date(2024, 1, 1)).len(), MAX_CATCH_UP);
    }

    #[test]
    fn materialized_income_carries_template_fields() {
        let mut tpl = template(Frequency::Monthly, Some(1), date(2024, 4, 1));
        tpl.kind = TemplateKind::Income;
        tpl.category = "salary".to_string();

        let GeneratedTransaction::Income(income) =
            materialize(&tpl, date(2024, 4, 1), "inc-1".to_string(), Utc::now())
        else {
            panic!("expected an income");
        };
        assert_eq!(income.source, "salary");
        assert_eq!(income.amount_minor, 4_500);
        assert_eq!(income.date.date_naive(), date(2024, 4, 1));
        assert_eq!(income.local_id.as_deref(), Some("recurring_tpl-1_2024-04-01"));
    }
}
