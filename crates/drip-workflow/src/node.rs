use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A node in a validated workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  pub kind: NodeKind,
}

impl Node {
  pub fn lead_source(node_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      kind: NodeKind::LeadSource,
    }
  }

  pub fn delay(node_id: impl Into<String>, amount: u64, unit: DelayUnit) -> Self {
    Self {
      node_id: node_id.into(),
      kind: NodeKind::Delay(Delay { amount, unit }),
    }
  }

  pub fn email(
    node_id: impl Into<String>,
    subject: impl Into<String>,
    body: impl Into<String>,
  ) -> Self {
    Self {
      node_id: node_id.into(),
      kind: NodeKind::Email(EmailContent {
        subject: subject.into(),
        body: body.into(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
  /// Marks where recipients enter the sequence. No timing effect.
  LeadSource,
  /// Pushes every downstream node later by the configured amount.
  Delay(Delay),
  /// Sends one email at the delay accumulated along its path.
  Email(EmailContent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
  pub amount: u64,
  pub unit: DelayUnit,
}

impl Delay {
  /// The delay expressed in hours.
  pub fn hours(&self) -> f64 {
    self.unit.to_hours(self.amount)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
  pub subject: String,
  pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
  Minute,
  Hour,
  Day,
  Week,
}

impl DelayUnit {
  /// Convert `amount` of this unit to hours.
  pub fn to_hours(self, amount: u64) -> f64 {
    let amount = amount as f64;
    match self {
      DelayUnit::Minute => amount / 60.0,
      DelayUnit::Hour => amount,
      DelayUnit::Day => amount * 24.0,
      DelayUnit::Week => amount * 24.0 * 7.0,
    }
  }

  /// Parse an editor unit label, falling back to days for anything unrecognized.
  ///
  /// Returns the unit and whether the fallback was taken.
  pub fn from_label(label: Option<&str>) -> (Self, bool) {
    match label.map(str::parse::<DelayUnit>) {
      Some(Ok(unit)) => (unit, false),
      _ => (DelayUnit::Day, true),
    }
  }
}

impl FromStr for DelayUnit {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "minute" | "minutes" | "min" => Ok(DelayUnit::Minute),
      "hour" | "hours" => Ok(DelayUnit::Hour),
      "day" | "days" => Ok(DelayUnit::Day),
      "week" | "weeks" => Ok(DelayUnit::Week),
      other => Err(format!("unknown delay unit: {}", other)),
    }
  }
}

impl fmt::Display for DelayUnit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      DelayUnit::Minute => "minute",
      DelayUnit::Hour => "hour",
      DelayUnit::Day => "day",
      DelayUnit::Week => "week",
    };
    f.write_str(s)
  }
}
