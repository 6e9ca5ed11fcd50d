//! Position ledger: dense, zero-based, gapless ordering inside a bucket.
//!
//! A bucket is either the tasks placed in one (project, section) pair or the
//! live sections of one project. Every shift is a single set-based `UPDATE`
//! and must run inside the caller's write transaction.
//!
//! No unique index backs `position`: SQLite checks uniqueness row by row
//! during an `UPDATE`, and a +1 range shift passes through transient
//! duplicates. Density is maintained by the algorithm instead.
//!
//! Soft-deleted tasks keep their placement rows and so keep their slots.
//! Positions are dense over all rows in a bucket; reads that hide deleted
//! tasks may show gaps.

use crate::error::{EngineError, EngineResult};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use tracing::debug;

/// Which ordered set of rows a ledger operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket<'a> {
    /// Task placements in one project, inside `section_id` or unsectioned.
    Placements {
        project_id: &'a str,
        section_id: Option<&'a str>,
    },
    /// Live sections of one project.
    Sections { project_id: &'a str },
}

impl<'a> Bucket<'a> {
    pub fn placements(project_id: &'a str, section_id: Option<&'a str>) -> Self {
        Bucket::Placements {
            project_id,
            section_id,
        }
    }

    pub fn sections(project_id: &'a str) -> Self {
        Bucket::Sections { project_id }
    }

    fn table(&self) -> &'static str {
        match self {
            Bucket::Placements { .. } => "task_projects",
            Bucket::Sections { .. } => "sections",
        }
    }

    fn item_column(&self) -> &'static str {
        match self {
            Bucket::Placements { .. } => "task_id",
            Bucket::Sections { .. } => "id",
        }
    }

    /// `WHERE` fragment selecting the bucket; `IS` makes the NULL section match.
    fn scope(&self) -> &'static str {
        match self {
            Bucket::Placements { .. } => "project_id = ? AND section_id IS ?",
            Bucket::Sections { .. } => "project_id = ? AND is_deleted = 0",
        }
    }

    fn scope_params(&self) -> Vec<Value> {
        match self {
            Bucket::Placements {
                project_id,
                section_id,
            } => vec![
                Value::Text(project_id.to_string()),
                section_id.map_or(Value::Null, |s| Value::Text(s.to_string())),
            ],
            Bucket::Sections { project_id } => vec![Value::Text(project_id.to_string())],
        }
    }
}

/// Number of items in the bucket.
pub fn count(conn: &Connection, bucket: Bucket<'_>) -> EngineResult<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        bucket.table(),
        bucket.scope()
    );
    let n = conn.query_row(&sql, params_from_iter(bucket.scope_params()), |row| {
        row.get(0)
    })?;
    Ok(n)
}

/// Position an appended item would take: `max + 1`, or `0` when empty.
pub fn next_position(conn: &Connection, bucket: Bucket<'_>) -> EngineResult<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM {} WHERE {}",
        bucket.table(),
        bucket.scope()
    );
    let next = conn.query_row(&sql, params_from_iter(bucket.scope_params()), |row| {
        row.get(0)
    })?;
    Ok(next)
}

/// Positions in the bucket, ascending.
pub fn positions(conn: &Connection, bucket: Bucket<'_>) -> EngineResult<Vec<i64>> {
    let sql = format!(
        "SELECT position FROM {} WHERE {} ORDER BY position",
        bucket.table(),
        bucket.scope()
    );
    let mut stmt = conn.prepare(&sql)?;
    let positions = stmt
        .query_map(params_from_iter(bucket.scope_params()), |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(positions)
}

/// True when the bucket's positions are exactly `0..count`.
pub fn is_dense(conn: &Connection, bucket: Bucket<'_>) -> EngineResult<bool> {
    let positions = positions(conn, bucket)?;
    Ok(positions.iter().copied().eq(0..positions.len() as i64))
}

/// Add `delta` to every position in `[lo, hi]` (`hi = None`: unbounded).
fn shift(
    conn: &Connection,
    bucket: Bucket<'_>,
    lo: i64,
    hi: Option<i64>,
    delta: i64,
) -> EngineResult<usize> {
    let mut sql = format!(
        "UPDATE {} SET position = position + ? WHERE {} AND position >= ?",
        bucket.table(),
        bucket.scope()
    );
    let mut params = vec![Value::Integer(delta)];
    params.extend(bucket.scope_params());
    params.push(Value::Integer(lo));
    if let Some(hi) = hi {
        sql.push_str(" AND position <= ?");
        params.push(Value::Integer(hi));
    }

    let shifted = conn.execute(&sql, params_from_iter(params))?;
    debug!(table = bucket.table(), lo, ?hi, delta, shifted, "ledger shift");
    Ok(shifted)
}

/// Reserve a slot for a new item and return its position.
///
/// Without `desired` the item is appended. With `desired = p` every item at
/// `p` or later moves down one first. `p` is clamped into `[0, count]`.
/// The caller writes the new row at the returned position.
pub fn insert(conn: &Connection, bucket: Bucket<'_>, desired: Option<i64>) -> EngineResult<i64> {
    let end = next_position(conn, bucket)?;
    match desired {
        None => Ok(end),
        Some(p) => {
            let p = p.clamp(0, end);
            if p < end {
                shift(conn, bucket, p, None, 1)?;
            }
            Ok(p)
        }
    }
}

/// Move `item_id` from `from` to `to` inside the bucket.
///
/// Only the range between the two positions shifts, toward the vacated slot.
/// `to` is clamped to the last position. Returns the final position.
pub fn move_item(
    conn: &Connection,
    bucket: Bucket<'_>,
    item_id: &str,
    from: i64,
    to: i64,
) -> EngineResult<i64> {
    let last = (next_position(conn, bucket)? - 1).max(0);
    let to = to.clamp(0, last);
    if to == from {
        return Ok(to);
    }

    if to < from {
        shift(conn, bucket, to, Some(from - 1), 1)?;
    } else {
        shift(conn, bucket, from + 1, Some(to), -1)?;
    }

    let sql = format!(
        "UPDATE {} SET position = ? WHERE {} AND {} = ?",
        bucket.table(),
        bucket.scope(),
        bucket.item_column()
    );
    let mut params = vec![Value::Integer(to)];
    params.extend(bucket.scope_params());
    params.push(Value::Text(item_id.to_string()));

    let updated = conn.execute(&sql, params_from_iter(params))?;
    if updated != 1 {
        return Err(EngineError::internal(format!(
            "ledger move touched {} rows for item {}",
            updated, item_id
        )));
    }
    Ok(to)
}

/// Close the gap left at `position` after its item left the bucket.
pub fn remove(conn: &Connection, bucket: Bucket<'_>, position: i64) -> EngineResult<()> {
    shift(conn, bucket, position + 1, None, -1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use rusqlite::params;

    const PROJECT: &str = "p1";

    fn setup() -> Database {
        let db = Database::open_in_memory().expect("Failed to create in-memory database");
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, workspace_id, name, created_by, created_at, updated_at)
                 VALUES (?1, 'w1', 'P', 'u1', 0, 0)",
                params![PROJECT],
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    /// Insert a section row at a ledger-assigned position.
    fn add(conn: &Connection, id: &str, desired: Option<i64>) -> i64 {
        let bucket = Bucket::sections(PROJECT);
        let pos = insert(conn, bucket, desired).unwrap();
        conn.execute(
            "INSERT INTO sections (id, project_id, name, position, created_by, created_at, updated_by, updated_at)
             VALUES (?1, ?2, ?1, ?3, 'u1', 0, 'u1', 0)",
            params![id, PROJECT, pos],
        )
        .unwrap();
        pos
    }

    fn order(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT id FROM sections WHERE project_id = ?1 AND is_deleted = 0 ORDER BY position")
            .unwrap();
        let ids = stmt
            .query_map(params![PROJECT], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        ids
    }

    fn position_of(conn: &Connection, id: &str) -> i64 {
        conn.query_row("SELECT position FROM sections WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .unwrap()
    }

    fn drop_item(conn: &Connection, id: &str) {
        let pos = position_of(conn, id);
        conn.execute("DELETE FROM sections WHERE id = ?1", params![id])
            .unwrap();
        remove(conn, Bucket::sections(PROJECT), pos).unwrap();
    }

    #[test]
    fn append_starts_at_zero() {
        let db = setup();
        db.with_conn(|conn| {
            assert_eq!(add(conn, "a", None), 0);
            assert_eq!(add(conn, "b", None), 1);
            assert_eq!(add(conn, "c", None), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn insert_at_shifts_tail() {
        let db = setup();
        db.with_conn(|conn| {
            add(conn, "a", None);
            add(conn, "b", None);
            assert_eq!(add(conn, "x", Some(1)), 1);
            assert_eq!(order(conn), vec!["a", "x", "b"]);
            assert!(is_dense(conn, Bucket::sections(PROJECT))?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn insert_beyond_end_is_clamped_to_append() {
        let db = setup();
        db.with_conn(|conn| {
            add(conn, "a", None);
            assert_eq!(add(conn, "b", Some(40)), 1);
            assert_eq!(add(conn, "c", Some(-3)), 0);
            assert_eq!(order(conn), vec!["c", "a", "b"]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn move_up_and_down() {
        let db = setup();
        db.with_conn(|conn| {
            for id in ["a", "b", "c", "d"] {
                add(conn, id, None);
            }
            let bucket = Bucket::sections(PROJECT);

            move_item(conn, bucket, "d", 3, 0)?;
            assert_eq!(order(conn), vec!["d", "a", "b", "c"]);

            move_item(conn, bucket, "d", 0, 2)?;
            assert_eq!(order(conn), vec!["a", "b", "d", "c"]);

            let landed = move_item(conn, bucket, "a", 0, 99)?;
            assert_eq!(landed, 3);
            assert_eq!(order(conn), vec!["b", "d", "c", "a"]);
            assert!(is_dense(conn, bucket)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn remove_closes_gap() {
        let db = setup();
        db.with_conn(|conn| {
            for id in ["a", "b", "c"] {
                add(conn, id, None);
            }
            drop_item(conn, "a");
            assert_eq!(order(conn), vec!["b", "c"]);
            assert_eq!(positions(conn, Bucket::sections(PROJECT))?, vec![0, 1]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn random_sequences_stay_dense() {
        let db = setup();
        db.with_conn(|conn| {
            let bucket = Bucket::sections(PROJECT);
            let mut live: Vec<String> = Vec::new();
            // Small LCG keeps the sequence deterministic.
            let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
            let mut next = |bound: u64| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (seed >> 33) % bound.max(1)
            };

            for step in 0..300 {
                match next(3) {
                    0 => {
                        let id = format!("s{}", step);
                        let desired = if next(2) == 0 {
                            None
                        } else {
                            Some(next(live.len() as u64 + 2) as i64)
                        };
                        add(conn, &id, desired);
                        live.push(id);
                    }
                    1 if !live.is_empty() => {
                        let id = live[next(live.len() as u64) as usize].clone();
                        let from = position_of(conn, &id);
                        let to = next(live.len() as u64) as i64;
                        move_item(conn, bucket, &id, from, to)?;
                    }
                    _ if !live.is_empty() => {
                        let id = live.remove(next(live.len() as u64) as usize);
                        drop_item(conn, &id);
                    }
                    _ => {}
                }
                assert!(is_dense(conn, bucket)?, "not dense after step {}", step);
                assert_eq!(count(conn, bucket)?, live.len() as i64);
            }
            Ok(())
        })
        .unwrap();
    }
}
