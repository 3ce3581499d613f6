use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use getset::Getters;
use itertools::Itertools;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::path::Path;
use std::result;
use std::str::FromStr;
use std::sync::Arc;
use validator::Validate;

/// One backup snapshot found under a container directory.
///
/// `time` is the directory's last modification time and stands in for the
/// moment the backup was created.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Builder, Getters)]
#[getset(get = "pub")]
pub struct Backup {
    #[builder(into)]
    name: Arc<str>,
    #[builder(into)]
    path: Arc<Path>,
    time: DateTime<Utc>,
}

/// Which rule selected a backup for deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum RetentionRule {
    #[display("count")]
    Count,
    #[display("age")]
    Age,
}

/// Per-container retention thresholds. `None` disables the rule.
#[skip_serializing_none]
#[derive(Clone, Copy, Default, Validate, Serialize, Deserialize, Debug, PartialEq, Eq, Builder)]
pub struct RetentionPolicy {
    /// Keep at most this many of the newest backups.
    #[serde(default, deserialize_with = "deserialize_retention_count")]
    pub retention_count: Option<usize>,
    /// Delete backups older than this many days.
    #[serde(default, deserialize_with = "deserialize_retention_days")]
    pub retention_days: Option<u64>,
}

/// Malformed input disables the rule rather than aborting the run.
///
/// Thresholds are unsigned: unlike a plain signed integer parse, `-1` is
/// rejected here, so it turns the rule off instead of selecting every backup.
pub fn parse_threshold<T: FromStr>(var: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::error!("Invalid {var} value: {raw}. It should be an integer.");
            None
        }
    }
}

/// Accepts any scalar and routes it through [`parse_threshold`], so a bad
/// value in a config file disables the rule like a bad environment value does.
struct ThresholdVisitor<T> {
    var: &'static str,
    marker: PhantomData<T>,
}

impl<T> ThresholdVisitor<T> {
    fn new(var: &'static str) -> Self {
        Self {
            var,
            marker: PhantomData,
        }
    }

    fn parse<D: Display>(&self, raw: D) -> Option<T>
    where
        T: FromStr,
    {
        parse_threshold(self.var, &raw.to_string())
    }
}

impl<'de, T: FromStr> Visitor<'de> for ThresholdVisitor<T> {
    type Value = Option<T>;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a non-negative integer")
    }

    fn visit_bool<E: serde::de::Error>(self, v: bool) -> result::Result<Self::Value, E> {
        Ok(self.parse(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> result::Result<Self::Value, E> {
        Ok(self.parse(v))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> result::Result<Self::Value, E> {
        Ok(self.parse(v))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> result::Result<Self::Value, E> {
        Ok(self.parse(v))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> result::Result<Self::Value, E> {
        Ok(self.parse(v))
    }

    fn visit_none<E: serde::de::Error>(self) -> result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: serde::de::Error>(self) -> result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> result::Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

fn deserialize_retention_count<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> result::Result<Option<usize>, D::Error> {
    deserializer.deserialize_any(ThresholdVisitor::new("retention_count"))
}

fn deserialize_retention_days<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> result::Result<Option<u64>, D::Error> {
    deserializer.deserialize_any(ThresholdVisitor::new("retention_days"))
}

impl RetentionPolicy {
    pub fn is_disabled(&self) -> bool {
        self.retention_count.is_none() && self.retention_days.is_none()
    }

    /// Oldest backups beyond `retention_count`. `sorted` must be oldest first.
    pub fn count_marked<'a>(&self, sorted: &'a [Backup]) -> &'a [Backup] {
        match self.retention_count {
            Some(keep) if sorted.len() > keep => &sorted[..sorted.len() - keep],
            _ => &[],
        }
    }

    /// Anything modified strictly before this instant is out of retention.
    ///
    /// `None` when the age rule is off, or when the cutoff lies before the
    /// representable range (nothing can be that old).
    pub fn age_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = i64::try_from(self.retention_days?).ok()?;
        now.checked_sub_signed(Duration::try_days(days)?)
    }

    pub fn age_marked<'a>(
        &self,
        backups: &'a [Backup],
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a Backup> {
        let cutoff = self.age_cutoff(now);
        backups
            .iter()
            .filter(move |b| cutoff.is_some_and(|cutoff| b.time < cutoff))
    }

    /// Every rule hit, in rule order. A backup matching both rules shows up twice.
    pub fn marks<'a>(
        &self,
        sorted: &'a [Backup],
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = (&'a Backup, RetentionRule)> {
        self.count_marked(sorted)
            .iter()
            .map(|b| (b, RetentionRule::Count))
            .chain(self.age_marked(sorted, now).map(|b| (b, RetentionRule::Age)))
    }

    /// Union of both rules. `sorted` must be oldest first.
    pub fn get_delete(&self, sorted: &[Backup], now: DateTime<Utc>) -> DeletionSet {
        self.marks(sorted, now).map(|(b, _)| b).collect()
    }
}

/// Sorts oldest first. Equal timestamps fall back to the backup name so the
/// order never depends on directory listing order.
pub fn sort_oldest_first(backups: Vec<Backup>) -> Vec<Backup> {
    backups
        .into_iter()
        .sorted_by(|a, b| a.time.cmp(&b.time).then_with(|| a.name.cmp(&b.name)))
        .collect()
}

/// Paths of the backups selected for deletion within one container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletionSet {
    paths: HashSet<Arc<Path>>,
}

impl DeletionSet {
    /// Returns `false` when the backup was already marked.
    pub fn insert(&mut self, backup: &Backup) -> bool {
        self.paths.insert(backup.path.clone())
    }

    pub fn contains(&self, backup: &Backup) -> bool {
        self.paths.contains(&backup.path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<'a> FromIterator<&'a Backup> for DeletionSet {
    fn from_iter<I: IntoIterator<Item = &'a Backup>>(iter: I) -> Self {
        let mut set = DeletionSet::default();
        iter.into_iter().for_each(|b| {
            set.insert(b);
        });
        set
    }
}
