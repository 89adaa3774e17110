//! Wire contract shared by the device client and the server.
//!
//! Every record the server confirms, every create payload a device may queue
//! while offline and every partial update travels in the shapes defined here.
//! Field names are camelCase on the wire and the server id is `_id`.

use std::fmt::Debug;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// The three entity types the offline engine tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Expense,
    Income,
    Recurring,
}

impl EntityKind {
    /// Singular name, used in local ids and storage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
            Self::Recurring => "recurring",
        }
    }

    /// REST collection segment.
    pub fn path(self) -> &'static str {
        match self {
            Self::Expense => "expenses",
            Self::Income => "incomes",
            Self::Recurring => "recurring",
        }
    }
}

impl TryFrom<&str> for EntityKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "expense" | "expenses" => Ok(Self::Expense),
            "income" | "incomes" => Ok(Self::Income),
            "recurring" => Ok(Self::Recurring),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-confirmed record together with its create and update shapes.
pub trait Record: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Payload of a create request (and of a queued offline create).
    type Draft: NewRecord;
    /// Partial update, every field optional.
    type Patch: Patch + ApplyTo<Self> + ApplyTo<Self::Draft>;

    const KIND: EntityKind;

    /// Server-assigned id.
    fn id(&self) -> &str;

    /// Idempotency key the record was created with, if any.
    fn local_id(&self) -> Option<&str>;

    /// Semantic date used to order merged views.
    fn date(&self) -> DateTime<Utc>;

    /// Grouping label used by the `category` list filter.
    fn category(&self) -> &str;

    /// Stamps the last modification time.
    fn touch(&mut self, now: DateTime<Utc>);

    fn from_draft(
        id: String,
        draft: Self::Draft,
        local_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self;

    /// A patch carrying every field of `draft` that a patch can express.
    fn patch_from_draft(draft: &Self::Draft) -> Self::Patch;

    fn apply(&mut self, patch: &Self::Patch) {
        patch.apply_to(self);
    }
}

/// A create payload.
pub trait NewRecord:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn date(&self) -> DateTime<Utc>;

    /// Server-side checks; the message is returned to the caller verbatim.
    fn validate(&self) -> Result<(), String>;
}

/// A partial update.
pub trait Patch:
    Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Folds `newer` into `self`. Fields present in `newer` win.
    fn merge(&mut self, newer: Self);

    fn is_empty(&self) -> bool;

    fn validate(&self) -> Result<(), String>;
}

/// Overwrites exactly the fields a patch carries.
pub trait ApplyTo<T> {
    fn apply_to(&self, target: &mut T);
}

/// Generates the merge/emptiness helpers and the `ApplyTo` impls of a patch.
///
/// `set` fields are plain fields on the targets, `wrap` fields are optional
/// on the targets and become `Some` when patched.
macro_rules! impl_patch {
    (@apply $patch:ty, [], [$($field:ident),*], [$($opt:ident),*]) => {};
    (@apply $patch:ty, [$target:ty $(, $rest:ty)*], [$($field:ident),*], [$($opt:ident),*]) => {
        impl ApplyTo<$target> for $patch {
            fn apply_to(&self, target: &mut $target) {
                $(
                    if let Some(value) = &self.$field {
                        target.$field = value.clone();
                    }
                )*
                $(
                    if let Some(value) = &self.$opt {
                        target.$opt = Some(value.clone());
                    }
                )*
            }
        }

        impl_patch!(@apply $patch, [$($rest),*], [$($field),*], [$($opt),*]);
    };
    ($patch:ty => [$($target:ty),+] set { $($field:ident),* } wrap { $($opt:ident),* }) => {
        impl $patch {
            fn merge_fields(&mut self, newer: Self) {
                $(
                    if newer.$field.is_some() {
                        self.$field = newer.$field;
                    }
                )*
                $(
                    if newer.$opt.is_some() {
                        self.$opt = newer.$opt;
                    }
                )*
            }

            fn has_no_fields(&self) -> bool {
                true $(&& self.$field.is_none())* $(&& self.$opt.is_none())*
            }
        }

        impl_patch!(@apply $patch, [$($target),+], [$($field),*], [$($opt),*]);
    };
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn check_amount(amount_minor: i64) -> Result<(), String> {
    if amount_minor <= 0 {
        return Err("amountMinor must be > 0".to_string());
    }
    Ok(())
}

fn check_label(value: &str, label: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{label} must not be empty"));
    }
    Ok(())
}

pub mod expense {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Expense {
        #[serde(rename = "_id")]
        pub id: String,
        pub amount_minor: i64,
        pub category: String,
        #[serde(default)]
        pub description: Option<String>,
        #[serde(default)]
        pub payment_method: Option<String>,
        pub date: DateTime<Utc>,
        #[serde(default)]
        pub local_id: Option<String>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExpenseNew {
        pub amount_minor: i64,
        pub category: String,
        #[serde(default)]
        pub description: Option<String>,
        #[serde(default)]
        pub payment_method: Option<String>,
        pub date: DateTime<Utc>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExpensePatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub amount_minor: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub category: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub payment_method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub date: Option<DateTime<Utc>>,
    }

    impl_patch!(ExpensePatch => [Expense, ExpenseNew]
        set { amount_minor, category, date }
        wrap { description, payment_method });

    impl Patch for ExpensePatch {
        fn merge(&mut self, newer: Self) {
            self.merge_fields(newer);
        }

        fn is_empty(&self) -> bool {
            self.has_no_fields()
        }

        fn validate(&self) -> Result<(), String> {
            if let Some(amount_minor) = self.amount_minor {
                check_amount(amount_minor)?;
            }
            if let Some(category) = &self.category {
                check_label(category, "category")?;
            }
            Ok(())
        }
    }

    impl NewRecord for ExpenseNew {
        fn date(&self) -> DateTime<Utc> {
            self.date
        }

        fn validate(&self) -> Result<(), String> {
            check_amount(self.amount_minor)?;
            check_label(&self.category, "category")
        }
    }

    impl Record for Expense {
        type Draft = ExpenseNew;
        type Patch = ExpensePatch;

        const KIND: EntityKind = EntityKind::Expense;

        fn id(&self) -> &str {
            &self.id
        }

        fn local_id(&self) -> Option<&str> {
            self.local_id.as_deref()
        }

        fn date(&self) -> DateTime<Utc> {
            self.date
        }

        fn category(&self) -> &str {
            &self.category
        }

        fn touch(&mut self, now: DateTime<Utc>) {
            self.updated_at = now;
        }

        fn from_draft(
            id: String,
            draft: ExpenseNew,
            local_id: Option<String>,
            now: DateTime<Utc>,
        ) -> Self {
            Self {
                id,
                amount_minor: draft.amount_minor,
                category: draft.category,
                description: draft.description,
                payment_method: draft.payment_method,
                date: draft.date,
                local_id,
                created_at: now,
                updated_at: now,
            }
        }

        fn patch_from_draft(draft: &ExpenseNew) -> ExpensePatch {
            ExpensePatch {
                amount_minor: Some(draft.amount_minor),
                category: Some(draft.category.clone()),
                description: draft.description.clone(),
                payment_method: draft.payment_method.clone(),
                date: Some(draft.date),
            }
        }
    }
}

pub mod income {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Income {
        #[serde(rename = "_id")]
        pub id: String,
        pub amount_minor: i64,
        pub source: String,
        #[serde(default)]
        pub description: Option<String>,
        pub date: DateTime<Utc>,
        #[serde(default)]
        pub local_id: Option<String>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct IncomeNew {
        pub amount_minor: i64,
        pub source: String,
        #[serde(default)]
        pub description: Option<String>,
        pub date: DateTime<Utc>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct IncomePatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub amount_minor: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub date: Option<DateTime<Utc>>,
    }

    impl_patch!(IncomePatch => [Income, IncomeNew]
        set { amount_minor, source, date }
        wrap { description });

    impl Patch for IncomePatch {
        fn merge(&mut self, newer: Self) {
            self.merge_fields(newer);
        }

        fn is_empty(&self) -> bool {
            self.has_no_fields()
        }

        fn validate(&self) -> Result<(), String> {
            if let Some(amount_minor) = self.amount_minor {
                check_amount(amount_minor)?;
            }
            if let Some(source) = &self.source {
                check_label(source, "source")?;
            }
            Ok(())
        }
    }

    impl NewRecord for IncomeNew {
        fn date(&self) -> DateTime<Utc> {
            self.date
        }

        fn validate(&self) -> Result<(), String> {
            check_amount(self.amount_minor)?;
            check_label(&self.source, "source")
        }
    }

    impl Record for Income {
        type Draft = IncomeNew;
        type Patch = IncomePatch;

        const KIND: EntityKind = EntityKind::Income;

        fn id(&self) -> &str {
            &self.id
        }

        fn local_id(&self) -> Option<&str> {
            self.local_id.as_deref()
        }

        fn date(&self) -> DateTime<Utc> {
            self.date
        }

        fn category(&self) -> &str {
            &self.source
        }

        fn touch(&mut self, now: DateTime<Utc>) {
            self.updated_at = now;
        }

        fn from_draft(
            id: String,
            draft: IncomeNew,
            local_id: Option<String>,
            now: DateTime<Utc>,
        ) -> Self {
            Self {
                id,
                amount_minor: draft.amount_minor,
                source: draft.source,
                description: draft.description,
                date: draft.date,
                local_id,
                created_at: now,
                updated_at: now,
            }
        }

        fn patch_from_draft(draft: &IncomeNew) -> IncomePatch {
            IncomePatch {
                amount_minor: Some(draft.amount_minor),
                source: Some(draft.source.clone()),
                description: draft.description.clone(),
                date: Some(draft.date),
            }
        }
    }
}

pub mod recurring {
    use chrono::Datelike;

    use super::*;
    use crate::{expense::Expense, income::Income};

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Frequency {
        Daily,
        Weekly,
        Monthly,
        Yearly,
    }

    impl Frequency {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Daily => "daily",
                Self::Weekly => "weekly",
                Self::Monthly => "monthly",
                Self::Yearly => "yearly",
            }
        }
    }

    impl TryFrom<&str> for Frequency {
        type Error = String;

        fn try_from(value: &str) -> Result<Self, Self::Error> {
            match value {
                "daily" => Ok(Self::Daily),
                "weekly" => Ok(Self::Weekly),
                "monthly" => Ok(Self::Monthly),
                "yearly" => Ok(Self::Yearly),
                other => Err(format!("unknown frequency: {other}")),
            }
        }
    }

    /// Which kind of transaction a template produces.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TemplateKind {
        Expense,
        Income,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RecurringTemplate {
        #[serde(rename = "_id")]
        pub id: String,
        pub kind: TemplateKind,
        pub amount_minor: i64,
        /// Expense category, or income source.
        pub category: String,
        #[serde(default)]
        pub description: Option<String>,
        pub frequency: Frequency,
        #[serde(default)]
        pub day_of_month: Option<u32>,
        pub start_date: NaiveDate,
        #[serde(default)]
        pub end_date: Option<NaiveDate>,
        pub next_due_date: NaiveDate,
        #[serde(default)]
        pub last_generated_date: Option<NaiveDate>,
        pub active: bool,
        #[serde(default)]
        pub local_id: Option<String>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    fn default_active() -> bool {
        true
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RecurringNew {
        pub kind: TemplateKind,
        pub amount_minor: i64,
        pub category: String,
        #[serde(default)]
        pub description: Option<String>,
        pub frequency: Frequency,
        #[serde(default)]
        pub day_of_month: Option<u32>,
        pub start_date: NaiveDate,
        #[serde(default)]
        pub end_date: Option<NaiveDate>,
        #[serde(default = "default_active")]
        pub active: bool,
    }

    /// `nextDueDate` and `lastGeneratedDate` are deliberately absent: only
    /// the due-date calculator writes them.
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RecurringPatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub amount_minor: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub category: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub frequency: Option<Frequency>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub day_of_month: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub end_date: Option<NaiveDate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub active: Option<bool>,
    }

    impl_patch!(RecurringPatch => [RecurringTemplate, RecurringNew]
        set { amount_minor, category, frequency, active }
        wrap { description, day_of_month, end_date });

    fn check_day_of_month(day: Option<u32>) -> Result<(), String> {
        match day {
            Some(day) if !(1..=31).contains(&day) => {
                Err("dayOfMonth must be between 1 and 31".to_string())
            }
            _ => Ok(()),
        }
    }

    impl Patch for RecurringPatch {
        fn merge(&mut self, newer: Self) {
            self.merge_fields(newer);
        }

        fn is_empty(&self) -> bool {
            self.has_no_fields()
        }

        fn validate(&self) -> Result<(), String> {
            if let Some(amount_minor) = self.amount_minor {
                check_amount(amount_minor)?;
            }
            if let Some(category) = &self.category {
                check_label(category, "category")?;
            }
            check_day_of_month(self.day_of_month)
        }
    }

    impl NewRecord for RecurringNew {
        fn date(&self) -> DateTime<Utc> {
            midnight_utc(self.start_date)
        }

        fn validate(&self) -> Result<(), String> {
            check_amount(self.amount_minor)?;
            check_label(&self.category, "category")?;
            check_day_of_month(self.day_of_month)?;
            if let Some(end_date) = self.end_date
                && end_date < self.start_date
            {
                return Err("endDate must not precede startDate".to_string());
            }
            Ok(())
        }
    }

    impl Record for RecurringTemplate {
        type Draft = RecurringNew;
        type Patch = RecurringPatch;

        const KIND: EntityKind = EntityKind::Recurring;

        fn id(&self) -> &str {
            &self.id
        }

        fn local_id(&self) -> Option<&str> {
            self.local_id.as_deref()
        }

        fn date(&self) -> DateTime<Utc> {
            midnight_utc(self.next_due_date)
        }

        fn category(&self) -> &str {
            &self.category
        }

        fn touch(&mut self, now: DateTime<Utc>) {
            self.updated_at = now;
        }

        /// The first occurrence is the start date. Monthly and yearly
        /// templates anchor on the start date's day when none is given, so
        /// a clamped month never shifts later occurrences.
        fn from_draft(
            id: String,
            draft: RecurringNew,
            local_id: Option<String>,
            now: DateTime<Utc>,
        ) -> Self {
            let day_of_month = match draft.frequency {
                Frequency::Monthly | Frequency::Yearly => {
                    draft.day_of_month.or(Some(draft.start_date.day()))
                }
                Frequency::Daily | Frequency::Weekly => draft.day_of_month,
            };
            Self {
                id,
                kind: draft.kind,
                amount_minor: draft.amount_minor,
                category: draft.category,
                description: draft.description,
                frequency: draft.frequency,
                day_of_month,
                start_date: draft.start_date,
                end_date: draft.end_date,
                next_due_date: draft.start_date,
                last_generated_date: None,
                active: draft.active,
                local_id,
                created_at: now,
                updated_at: now,
            }
        }

        /// `kind` and `startDate` are fixed at creation and never patched.
        fn patch_from_draft(draft: &RecurringNew) -> RecurringPatch {
            RecurringPatch {
                amount_minor: Some(draft.amount_minor),
                category: Some(draft.category.clone()),
                description: draft.description.clone(),
                frequency: Some(draft.frequency),
                day_of_month: draft.day_of_month,
                end_date: draft.end_date,
                active: Some(draft.active),
            }
        }
    }

    /// A concrete transaction produced from a template.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum GeneratedTransaction {
        Expense(Expense),
        Income(Income),
    }

    /// Response of `POST /recurring/{id}/generate`.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Generated {
        pub template: RecurringTemplate,
        pub transaction: GeneratedTransaction,
    }

    /// Response of `POST /recurring/process-due`.
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProcessDueReport {
        pub generated: Vec<GeneratedTransaction>,
        pub templates: Vec<RecurringTemplate>,
    }
}

/// Body of every create request: the draft plus the optional idempotency key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest<D> {
    #[serde(flatten)]
    pub draft: D,
    #[serde(rename = "localId", default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
}

/// Response envelope used by every endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Filters accepted by the list endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Inclusive lower bound on the record's semantic date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the record's semantic date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ListQuery {
    pub fn matches<R: Record>(&self, record: &R) -> bool {
        let date = record.date();
        if self.from.is_some_and(|from| date < from) || self.to.is_some_and(|to| date > to) {
            return false;
        }
        match &self.category {
            Some(category) => record.category().eq_ignore_ascii_case(category),
            None => true,
        }
    }
}
