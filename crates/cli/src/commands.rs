use api_types::{
    EntityKind, ListQuery, Record,
    expense::{ExpenseNew, ExpensePatch},
    income::{IncomeNew, IncomePatch},
    recurring::{Frequency, GeneratedTransaction, RecurringNew, RecurringPatch, TemplateKind},
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use engine::{
    Amount, EngineError, KeyValueStore, MergedRecord, Mutation, OfflineService, RemoteApi,
    SyncEngine,
};
use serde_json::Value;

use crate::error::{AppError, Result};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Server records merged with the changes still pending on this device.
    List(ListArgs),
    Add {
        #[command(subcommand)]
        record: AddCommand,
    },
    Update(UpdateArgs),
    Delete {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        id: String,
    },
    /// Replays every pending change against the server.
    Sync,
    /// Shows (or drops) the changes waiting for the server.
    Pending {
        #[arg(long)]
        clear: bool,
    },
    Recurring {
        #[command(subcommand)]
        command: RecurringCommand,
    },
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(value_parser = parse_kind)]
    kind: EntityKind,
    #[arg(long, value_parser = parse_datetime)]
    from: Option<DateTime<Utc>>,
    #[arg(long, value_parser = parse_datetime)]
    to: Option<DateTime<Utc>>,
    #[arg(long)]
    category: Option<String>,
    /// Only rows that exist on this device alone.
    #[arg(long)]
    offline: bool,
}

#[derive(Subcommand, Debug)]
pub enum AddCommand {
    Expense {
        #[arg(value_parser = parse_amount)]
        amount: Amount,
        category: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        payment_method: Option<String>,
        /// Defaults to now.
        #[arg(long, value_parser = parse_datetime)]
        date: Option<DateTime<Utc>>,
    },
    Income {
        #[arg(value_parser = parse_amount)]
        amount: Amount,
        source: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_datetime)]
        date: Option<DateTime<Utc>>,
    },
    Recurring {
        #[arg(value_parser = parse_template_kind)]
        kind: TemplateKind,
        #[arg(value_parser = parse_amount)]
        amount: Amount,
        /// Expense category, or income source.
        category: String,
        #[arg(value_parser = parse_frequency)]
        frequency: Frequency,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        day_of_month: Option<u32>,
        /// Defaults to today.
        #[arg(long, value_parser = parse_day)]
        start: Option<NaiveDate>,
        #[arg(long, value_parser = parse_day)]
        end: Option<NaiveDate>,
        #[arg(long)]
        paused: bool,
    },
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[arg(value_parser = parse_kind)]
    kind: EntityKind,
    id: String,
    #[arg(long, value_parser = parse_amount)]
    amount: Option<Amount>,
    /// Expense or template category, income source.
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    payment_method: Option<String>,
    #[arg(long, value_parser = parse_datetime)]
    date: Option<DateTime<Utc>>,
    #[arg(long, value_parser = parse_frequency)]
    frequency: Option<Frequency>,
    #[arg(long)]
    day_of_month: Option<u32>,
    #[arg(long, value_parser = parse_day)]
    end: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
pub enum RecurringCommand {
    /// Pauses an active template, resumes a paused one.
    Toggle { id: String },
    /// Generates the next transaction of a template now.
    Generate { id: String },
    /// Generates every transaction that is due.
    ProcessDue,
}

fn parse_kind(value: &str) -> std::result::Result<EntityKind, String> {
    EntityKind::try_from(value)
}

fn parse_frequency(value: &str) -> std::result::Result<Frequency, String> {
    Frequency::try_from(value)
}

fn parse_template_kind(value: &str) -> std::result::Result<TemplateKind, String> {
    match value {
        "expense" => Ok(TemplateKind::Expense),
        "income" => Ok(TemplateKind::Income),
        other => Err(format!("unknown template kind: {other}")),
    }
}

fn parse_amount(value: &str) -> std::result::Result<Amount, EngineError> {
    value.parse()
}

/// `YYYY-MM-DD`.
fn parse_day(value: &str) -> std::result::Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidDate(format!("\"{value}\" is not a YYYY-MM-DD date")))
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC.
fn parse_datetime(value: &str) -> std::result::Result<DateTime<Utc>, EngineError> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value.trim()) {
        return Ok(datetime.with_timezone(&Utc));
    }
    Ok(parse_day(value)?.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn amount_minor(amount: Amount) -> Result<i64> {
    if amount.minor() <= 0 {
        return Err(AppError::Input("amount must be greater than zero".to_string()));
    }
    Ok(amount.minor())
}

fn expense_patch(args: &UpdateArgs) -> ExpensePatch {
    ExpensePatch {
        amount_minor: args.amount.map(Amount::minor),
        category: args.category.clone(),
        description: args.description.clone(),
        payment_method: args.payment_method.clone(),
        date: args.date,
    }
}

fn income_patch(args: &UpdateArgs) -> IncomePatch {
    IncomePatch {
        amount_minor: args.amount.map(Amount::minor),
        source: args.category.clone(),
        description: args.description.clone(),
        date: args.date,
    }
}

fn recurring_patch(args: &UpdateArgs) -> RecurringPatch {
    RecurringPatch {
        amount_minor: args.amount.map(Amount::minor),
        category: args.category.clone(),
        description: args.description.clone(),
        frequency: args.frequency,
        day_of_month: args.day_of_month,
        end_date: args.end,
        active: None,
    }
}

fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| value.get(*name))
}

/// One line per row: id, date, amount, label and the offline marker.
fn render_row<R: Record>(row: &MergedRecord<R>) -> Result<String> {
    let value = serde_json::to_value(row)?;
    let date = row.date().format("%Y-%m-%d");
    let amount = field(&value, &["amountMinor"])
        .and_then(Value::as_i64)
        .map(|minor| Amount::from_minor(minor).to_string())
        .unwrap_or_default();
    let label = field(&value, &["category", "source"])
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut line = format!("{:<28} {date} {amount:>10} {label}", row.id());
    if let Some(active) = field(&value, &["active"]).and_then(Value::as_bool)
        && !active
    {
        line.push_str(" [paused]");
    }
    if row.is_offline() {
        line.push_str(" [offline]");
    }
    Ok(line)
}

fn render_mutation<R: Record>(mutation: Mutation<R>) -> String {
    match mutation {
        Mutation::Saved(record) => format!("saved {}", record.id()),
        Mutation::Removed => "removed".to_string(),
        Mutation::Offline(pending) => {
            format!("server unreachable, saved on this device as {}", pending.id)
        }
        Mutation::Queued => "server unreachable, change queued for the next sync".to_string(),
    }
}

fn render_generated(transaction: &GeneratedTransaction) -> String {
    match transaction {
        GeneratedTransaction::Expense(expense) => format!(
            "expense {} {} {} {}",
            expense.id,
            expense.date.format("%Y-%m-%d"),
            Amount::from_minor(expense.amount_minor),
            expense.category
        ),
        GeneratedTransaction::Income(income) => format!(
            "income {} {} {} {}",
            income.id,
            income.date.format("%Y-%m-%d"),
            Amount::from_minor(income.amount_minor),
            income.source
        ),
    }
}

async fn list<S, A, R>(
    service: &OfflineService<S, A, R>,
    token: &str,
    args: &ListArgs,
) -> Result<Vec<String>>
where
    S: KeyValueStore,
    A: RemoteApi,
    R: Record,
{
    let query = ListQuery {
        from: args.from,
        to: args.to,
        category: args.category.clone(),
    };
    let view = service.fetch(token, &query).await?;

    let mut lines = Vec::with_capacity(view.records.len() + 1);
    if view.stale {
        let since = view
            .refreshed_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        lines.push(format!("offline, showing data cached at {since}"));
    }
    for row in view
        .records
        .iter()
        .filter(|row| !args.offline || row.is_offline())
    {
        lines.push(render_row(row)?);
    }
    Ok(lines)
}

async fn add<S: KeyValueStore, A: RemoteApi>(
    engine: &SyncEngine<S, A>,
    token: &str,
    record: AddCommand,
) -> Result<String> {
    let line = match record {
        AddCommand::Expense {
            amount,
            category,
            description,
            payment_method,
            date,
        } => {
            let draft = ExpenseNew {
                amount_minor: amount_minor(amount)?,
                category,
                description,
                payment_method,
                date: date.unwrap_or_else(Utc::now),
            };
            render_mutation(engine.expenses().create(token, draft).await?)
        }
        AddCommand::Income {
            amount,
            source,
            description,
            date,
        } => {
            let draft = IncomeNew {
                amount_minor: amount_minor(amount)?,
                source,
                description,
                date: date.unwrap_or_else(Utc::now),
            };
            render_mutation(engine.incomes().create(token, draft).await?)
        }
        AddCommand::Recurring {
            kind,
            amount,
            category,
            frequency,
            description,
            day_of_month,
            start,
            end,
            paused,
        } => {
            let draft = RecurringNew {
                kind,
                amount_minor: amount_minor(amount)?,
                category,
                description,
                frequency,
                day_of_month,
                start_date: start.unwrap_or_else(|| Utc::now().date_naive()),
                end_date: end,
                active: !paused,
            };
            render_mutation(engine.recurring().create(token, draft).await?)
        }
    };
    Ok(line)
}

async fn update<S: KeyValueStore, A: RemoteApi>(
    engine: &SyncEngine<S, A>,
    token: &str,
    args: UpdateArgs,
) -> Result<String> {
    let line = match args.kind {
        EntityKind::Expense => {
            let patch = expense_patch(&args);
            render_mutation(engine.expenses().update(token, &args.id, patch).await?)
        }
        EntityKind::Income => {
            let patch = income_patch(&args);
            render_mutation(engine.incomes().update(token, &args.id, patch).await?)
        }
        EntityKind::Recurring => {
            let patch = recurring_patch(&args);
            render_mutation(engine.recurring().update(token, &args.id, patch).await?)
        }
    };
    Ok(line)
}

async fn delete<S: KeyValueStore, A: RemoteApi>(
    engine: &SyncEngine<S, A>,
    token: &str,
    kind: EntityKind,
    id: &str,
) -> Result<String> {
    let line = match kind {
        EntityKind::Expense => render_mutation(engine.expenses().delete(token, id).await?),
        EntityKind::Income => render_mutation(engine.incomes().delete(token, id).await?),
        EntityKind::Recurring => render_mutation(engine.recurring().delete(token, id).await?),
    };
    Ok(line)
}

async fn recurring<S: KeyValueStore, A: RemoteApi>(
    engine: &SyncEngine<S, A>,
    token: &str,
    command: RecurringCommand,
) -> Result<Vec<String>> {
    let lines = match command {
        RecurringCommand::Toggle { id } => {
            vec![render_mutation(engine.recurring().toggle(token, &id).await?)]
        }
        RecurringCommand::Generate { id } => {
            let generated = engine.recurring().generate(token, &id).await?;
            vec![
                render_generated(&generated.transaction),
                format!("next due {}", generated.template.next_due_date),
            ]
        }
        RecurringCommand::ProcessDue => {
            let report = engine.recurring().process_due(token).await?;
            let mut lines: Vec<String> = report.generated.iter().map(render_generated).collect();
            lines.push(format!(
                "{} transaction(s) from {} template(s)",
                report.generated.len(),
                report.templates.len()
            ));
            lines
        }
    };
    Ok(lines)
}

/// Runs one command and returns the lines to print.
pub async fn execute<S: KeyValueStore, A: RemoteApi>(
    engine: &SyncEngine<S, A>,
    token: &str,
    command: Command,
) -> Result<Vec<String>> {
    let lines = match command {
        Command::List(args) => match args.kind {
            EntityKind::Expense => list(engine.expenses(), token, &args).await?,
            EntityKind::Income => list(engine.incomes(), token, &args).await?,
            EntityKind::Recurring => list(engine.recurring(), token, &args).await?,
        },
        Command::Add { record } => vec![add(engine, token, record).await?],
        Command::Update(args) => vec![update(engine, token, args).await?],
        Command::Delete { kind, id } => vec![delete(engine, token, kind, &id).await?],
        Command::Sync => {
            let report = engine.sync_pending(token).await?;
            let left = engine.pending_counts().await?.total();
            vec![format!(
                "synced {}, failed {}, still pending {left}",
                report.synced, report.errors
            )]
        }
        Command::Pending { clear: true } => {
            engine.clear_pending().await?;
            vec!["pending changes dropped".to_string()]
        }
        Command::Pending { clear: false } => {
            let counts = engine.pending_counts().await?;
            [
                (EntityKind::Expense, counts.expense),
                (EntityKind::Income, counts.income),
                (EntityKind::Recurring, counts.recurring),
            ]
            .into_iter()
            .map(|(kind, queue)| {
                format!(
                    "{:<10} creates {} updates {} deletes {}",
                    kind.as_str(),
                    queue.creates,
                    queue.updates,
                    queue.deletes
                )
            })
            .collect()
        }
        Command::Recurring { command } => recurring(engine, token, command).await?,
    };
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use engine::MemoryStore;
    use migration::MigratorTrait;

    use super::*;
    use crate::client::HttpApi;

    #[test]
    fn dates_accept_days_and_rfc3339() {
        let day = parse_datetime("2024-03-05").unwrap();
        assert_eq!(day.to_rfc3339(), "2024-03-05T00:00:00+00:00");

        let exact = parse_datetime("2024-03-05T10:30:00+02:00").unwrap();
        assert_eq!(exact.to_rfc3339(), "2024-03-05T08:30:00+00:00");

        assert!(matches!(
            parse_datetime("05/03/2024"),
            Err(EngineError::InvalidDate(_))
        ));
    }

    #[test]
    fn kinds_accept_singular_and_plural() {
        assert_eq!(parse_kind("expenses").unwrap(), EntityKind::Expense);
        assert_eq!(parse_kind("income").unwrap(), EntityKind::Income);
        assert!(parse_kind("budget").is_err());
        assert_eq!(parse_template_kind("income").unwrap(), TemplateKind::Income);
    }

    #[test]
    fn non_positive_amounts_are_rejected_before_any_call() {
        assert!(amount_minor(Amount::from_minor(0)).is_err());
        assert!(amount_minor("-3".parse().unwrap()).is_err());
        assert_eq!(amount_minor("3,20".parse().unwrap()).unwrap(), 320);
    }

    #[test]
    fn update_flags_map_to_the_kind_specific_patch() {
        let args = UpdateArgs {
            kind: EntityKind::Income,
            id: "srv-1".to_string(),
            amount: Some(Amount::from_minor(900)),
            category: Some("salary".to_string()),
            description: None,
            payment_method: None,
            date: None,
            frequency: None,
            day_of_month: None,
            end: None,
        };

        let income = income_patch(&args);
        assert_eq!(income.amount_minor, Some(900));
        assert_eq!(income.source.as_deref(), Some("salary"));

        let recurring = recurring_patch(&args);
        assert_eq!(recurring.category.as_deref(), Some("salary"));
        assert_eq!(recurring.active, None);
    }

    async fn online_engine() -> SyncEngine<MemoryStore, HttpApi> {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server::spawn_with_listener(db, listener).unwrap();
        let api = HttpApi::new(&format!("http://{addr}/"), Duration::from_secs(5)).unwrap();
        SyncEngine::builder(Arc::new(MemoryStore::new()), Arc::new(api)).build()
    }

    #[tokio::test]
    async fn add_then_list_renders_the_saved_row() {
        let engine = online_engine().await;

        let saved = execute(
            &engine,
            "alice",
            Command::Add {
                record: AddCommand::Expense {
                    amount: "12.50".parse().unwrap(),
                    category: "food".to_string(),
                    description: None,
                    payment_method: None,
                    date: Some(parse_datetime("2024-06-01").unwrap()),
                },
            },
        )
        .await
        .unwrap();
        assert!(saved[0].starts_with("saved "));

        let lines = execute(
            &engine,
            "alice",
            Command::List(ListArgs {
                kind: EntityKind::Expense,
                from: None,
                to: None,
                category: None,
                offline: false,
            }),
        )
        .await
        .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("2024-06-01"));
        assert!(lines[0].contains("12.50 food"));
        assert!(!lines[0].contains("[offline]"));
    }

    #[tokio::test]
    async fn pending_lists_every_kind() {
        let engine = online_engine().await;
        let lines = execute(&engine, "alice", Command::Pending { clear: false })
            .await
            .unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("expense"));
        assert!(lines[2].contains("deletes 0"));
    }
}
