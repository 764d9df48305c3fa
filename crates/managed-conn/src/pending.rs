//! Record of uncommitted data changes made through one connection

use parking_lot::Mutex;
use time::OffsetDateTime;

/// One data-mutating statement that ran outside auto-commit mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
   pub sql: String,
   /// Table (or other object) the statement targets, when it can be told
   pub object: Option<String>,
   pub rows_affected: u64,
   pub recorded_at: OffsetDateTime,
}

impl PendingChange {
   pub fn new(sql: impl Into<String>, rows_affected: u64) -> Self {
      let sql = sql.into();
      let object = affected_object(&sql);
      Self {
         sql,
         object,
         rows_affected,
         recorded_at: OffsetDateTime::now_utc(),
      }
   }
}

/// Ordered collection of changes awaiting commit or rollback.
///
/// Only informs the decision whether a commit/rollback prompt is needed; it
/// never drives a commit by itself.
#[derive(Debug, Default)]
pub struct PendingChangeBundle {
   changes: Mutex<Vec<PendingChange>>,
}

impl PendingChangeBundle {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn record(&self, change: PendingChange) {
      self.changes.lock().push(change);
   }

   pub fn snapshot(&self) -> Vec<PendingChange> {
      self.changes.lock().clone()
   }

   pub fn len(&self) -> usize {
      self.changes.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.changes.lock().is_empty()
   }

   /// Total number of rows touched by all recorded changes
   pub fn rows_affected(&self) -> u64 {
      self.changes.lock().iter().map(|c| c.rows_affected).sum()
   }

   /// Forgets every recorded change, returning how many there were.
   pub fn clear(&self) -> usize {
      let mut changes = self.changes.lock();
      let count = changes.len();
      changes.clear();
      count
   }
}

/// Extracts the target of an INSERT, UPDATE, DELETE or REPLACE statement.
fn affected_object(sql: &str) -> Option<String> {
   let mut words = sql.split_whitespace();
   let verb = words.next()?.to_ascii_uppercase();

   let target = match verb.as_str() {
      "UPDATE" => {
         let word = words.next()?;
         if word.eq_ignore_ascii_case("OR") {
            // UPDATE OR <conflict> <table>
            words.nth(1)?
         } else {
            word
         }
      }
      "INSERT" | "REPLACE" | "DELETE" => words.find(|w| {
         !w.eq_ignore_ascii_case("INTO")
            && !w.eq_ignore_ascii_case("FROM")
            && !w.eq_ignore_ascii_case("OR")
            && !w.eq_ignore_ascii_case("REPLACE")
            && !w.eq_ignore_ascii_case("IGNORE")
            && !w.eq_ignore_ascii_case("ABORT")
            && !w.eq_ignore_ascii_case("FAIL")
            && !w.eq_ignore_ascii_case("ROLLBACK")
      })?,
      _ => return None,
   };

   let name = target
      .split('(')
      .next()
      .unwrap_or(target)
      .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']' || c == ';');

   (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_affected_object() {
      assert_eq!(affected_object("INSERT INTO users (id) VALUES (1)").as_deref(), Some("users"));
      assert_eq!(affected_object("insert or replace into \"t\" values (1)").as_deref(), Some("t"));
      assert_eq!(affected_object("UPDATE accounts SET x = 1").as_deref(), Some("accounts"));
      assert_eq!(affected_object("UPDATE OR IGNORE accounts SET x = 1").as_deref(), Some("accounts"));
      assert_eq!(affected_object("DELETE FROM logs;").as_deref(), Some("logs"));
      assert_eq!(affected_object("INSERT INTO items(id) VALUES (1)").as_deref(), Some("items"));
      assert_eq!(affected_object("CREATE TABLE t (id INTEGER)"), None);
      assert_eq!(affected_object("   "), None);
   }

   #[test]
   fn test_bundle_keeps_order_and_clears() {
      let bundle = PendingChangeBundle::new();
      bundle.record(PendingChange::new("INSERT INTO a VALUES (1)", 1));
      bundle.record(PendingChange::new("UPDATE b SET x = 2", 3));

      let changes = bundle.snapshot();
      assert_eq!(changes.len(), 2);
      assert_eq!(changes[0].object.as_deref(), Some("a"));
      assert_eq!(changes[1].object.as_deref(), Some("b"));
      assert_eq!(bundle.rows_affected(), 4);

      assert_eq!(bundle.clear(), 2);
      assert!(bundle.is_empty());
      assert_eq!(bundle.clear(), 0);
   }
}
