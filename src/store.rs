use crate::calc::{self, AttendanceRecord, MarkRecord, Term, TermResult};
use crate::config::ScoringConfig;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Everything the scoring engine reads or writes goes through here.
pub trait MarkStore {
    fn student_class(&self, student_id: &str) -> anyhow::Result<Option<String>>;
    fn student_term_marks(&self, student_id: &str, term: Term) -> anyhow::Result<Vec<MarkRecord>>;
    fn student_marks(&self, student_id: &str) -> anyhow::Result<Vec<MarkRecord>>;
    /// Ordered by student insertion order, then mark insertion order.
    fn class_term_marks(&self, class_id: &str, term: Term) -> anyhow::Result<Vec<MarkRecord>>;
    fn class_results(&self, class_id: &str, term: Term) -> anyhow::Result<Vec<TermResult>>;
    fn student_results(&self, student_id: &str) -> anyhow::Result<Vec<TermResult>>;
    fn student_attendance(&self, student_id: &str) -> anyhow::Result<Vec<AttendanceRecord>>;
    /// Returns `true` when a mark for the same (student, term, subject) was replaced.
    fn upsert_mark(&self, rec: &MarkRecord) -> anyhow::Result<bool>;
    fn delete_mark(&self, student_id: &str, term: Term, subject: &str) -> anyhow::Result<bool>;
    fn replace_class_results(
        &self,
        class_id: &str,
        term: Term,
        results: &[TermResult],
    ) -> anyhow::Result<()>;
    fn upsert_attendance(&self, rec: &AttendanceRecord) -> anyhow::Result<()>;
    /// Drops the student with their marks, attendance and stored results.
    fn delete_student(&self, student_id: &str) -> anyhow::Result<()>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn term_at(r: &Row<'_>, idx: usize) -> rusqlite::Result<Term> {
    let n: i64 = r.get(idx)?;
    Term::new(n).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, n))
}

fn mark_from_row(r: &Row<'_>) -> rusqlite::Result<MarkRecord> {
    Ok(MarkRecord {
        student_id: r.get(0)?,
        class_id: r.get(1)?,
        term: term_at(r, 2)?,
        subject: r.get(3)?,
        mark: r.get(4)?,
    })
}

fn result_from_row(r: &Row<'_>) -> rusqlite::Result<TermResult> {
    Ok(TermResult {
        student_id: r.get(0)?,
        class_id: r.get(1)?,
        term: term_at(r, 2)?,
        total: r.get(3)?,
        average: r.get(4)?,
        subject_count: r.get::<_, i64>(5)?.max(0) as usize,
        grade: r.get(6)?,
        points: r.get::<_, Option<i64>>(7)?.map(|p| p.clamp(0, 255) as u8),
        rank: Some(r.get::<_, i64>(8)?.max(0) as usize),
    })
}

const MARK_COLUMNS: &str = "m.student_id, m.class_id, m.term, m.subject, m.mark";
const RESULT_COLUMNS: &str =
    "student_id, class_id, term, total, average, subject_count, grade, points, rank";

impl MarkStore for SqliteStore<'_> {
    fn student_class(&self, student_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT class_id FROM students WHERE id = ?",
                [student_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn student_term_marks(&self, student_id: &str, term: Term) -> anyhow::Result<Vec<MarkRecord>> {
        let sql = format!(
            "SELECT {} FROM marks m WHERE m.student_id = ? AND m.term = ? ORDER BY m.rowid",
            MARK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((student_id, term.index()), mark_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn student_marks(&self, student_id: &str) -> anyhow::Result<Vec<MarkRecord>> {
        let sql = format!(
            "SELECT {} FROM marks m WHERE m.student_id = ? ORDER BY m.term, m.subject",
            MARK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([student_id], mark_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn class_term_marks(&self, class_id: &str, term: Term) -> anyhow::Result<Vec<MarkRecord>> {
        let sql = format!(
            "SELECT {}
             FROM marks m
             JOIN students s ON s.id = m.student_id
             WHERE m.class_id = ? AND m.term = ?
             ORDER BY s.sort_order, m.rowid",
            MARK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((class_id, term.index()), mark_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn class_results(&self, class_id: &str, term: Term) -> anyhow::Result<Vec<TermResult>> {
        let sql = format!(
            "SELECT {} FROM term_results WHERE class_id = ? AND term = ? ORDER BY rank",
            RESULT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((class_id, term.index()), result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn student_results(&self, student_id: &str) -> anyhow::Result<Vec<TermResult>> {
        let sql = format!(
            "SELECT {} FROM term_results WHERE student_id = ? ORDER BY term",
            RESULT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([student_id], result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn student_attendance(&self, student_id: &str) -> anyhow::Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, class_id, term, days_present, total_days
             FROM attendance
             WHERE student_id = ?
             ORDER BY term",
        )?;
        let rows = stmt
            .query_map([student_id], |r| {
                Ok(AttendanceRecord {
                    student_id: r.get(0)?,
                    class_id: r.get(1)?,
                    term: term_at(r, 2)?,
                    days_present: r.get(3)?,
                    total_days: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_mark(&self, rec: &MarkRecord) -> anyhow::Result<bool> {
        let existed: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM marks WHERE student_id = ? AND term = ? AND subject = ?",
                (&rec.student_id, rec.term.index(), &rec.subject),
                |r| r.get(0),
            )
            .optional()?;
        self.conn.execute(
            "INSERT INTO marks(id, student_id, class_id, term, subject, mark, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, term, subject) DO UPDATE SET
               class_id = excluded.class_id,
               mark = excluded.mark,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &rec.student_id,
                &rec.class_id,
                rec.term.index(),
                &rec.subject,
                rec.mark,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(existed.is_some())
    }

    fn delete_mark(&self, student_id: &str, term: Term, subject: &str) -> anyhow::Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM marks WHERE student_id = ? AND term = ? AND subject = ?",
            (student_id, term.index(), subject),
        )?;
        Ok(n > 0)
    }

    fn replace_class_results(
        &self,
        class_id: &str,
        term: Term,
        results: &[TermResult],
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "DELETE FROM term_results WHERE class_id = ? AND term = ?",
            (class_id, term.index()),
        )?;
        let computed_at = chrono::Utc::now().to_rfc3339();
        let mut stmt = self.conn.prepare(
            "INSERT INTO term_results(class_id, term, student_id, total, average, subject_count, grade, points, rank, computed_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for r in results {
            stmt.execute((
                class_id,
                term.index(),
                &r.student_id,
                r.total,
                r.average,
                r.subject_count as i64,
                &r.grade,
                r.points.map(i64::from),
                r.rank.unwrap_or(0) as i64,
                &computed_at,
            ))?;
        }
        Ok(())
    }

    fn upsert_attendance(&self, rec: &AttendanceRecord) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO attendance(student_id, class_id, term, days_present, total_days, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, term) DO UPDATE SET
               class_id = excluded.class_id,
               days_present = excluded.days_present,
               total_days = excluded.total_days,
               updated_at = excluded.updated_at",
            (
                &rec.student_id,
                &rec.class_id,
                rec.term.index(),
                rec.days_present,
                rec.total_days,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    fn delete_student(&self, student_id: &str) -> anyhow::Result<()> {
        for table in ["term_results", "attendance", "marks"] {
            let sql = format!("DELETE FROM {} WHERE student_id = ?", table);
            self.conn.execute(&sql, [student_id])?;
        }
        self.conn
            .execute("DELETE FROM students WHERE id = ?", [student_id])?;
        Ok(())
    }
}

/// One writer per (class, term) inside this process. Paired with an
/// IMMEDIATE transaction so other processes on the same file also queue.
#[derive(Default)]
pub struct TermLocks {
    slots: Mutex<HashMap<(String, Term), Arc<Mutex<()>>>>,
}

impl TermLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, class_id: &str, term: Term) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry((class_id.to_string(), term))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn with_lock<T>(&self, class_id: &str, term: Term, f: impl FnOnce() -> T) -> T {
        self.with_locks(&[(class_id.to_string(), term)], f)
    }

    /// Holds every listed slot while `f` runs. Slots are taken in sorted
    /// order so overlapping multi-term writers cannot deadlock.
    pub fn with_locks<T>(&self, keys: &[(String, Term)], f: impl FnOnce() -> T) -> T {
        let mut sorted: Vec<&(String, Term)> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();
        let slots: Vec<Arc<Mutex<()>>> = sorted
            .iter()
            .map(|(class_id, term)| self.slot(class_id, *term))
            .collect();
        let _guards: Vec<MutexGuard<'_, ()>> = slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(|p| p.into_inner()))
            .collect();
        f()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub changed: bool,
    /// The freshly ranked class+term, as persisted.
    pub results: Vec<TermResult>,
}

/// Aggregates and ranks the full class+term and replaces the stored results.
pub fn recompute<S: MarkStore>(
    store: &S,
    class_id: &str,
    term: Term,
    cfg: &ScoringConfig,
) -> anyhow::Result<Vec<TermResult>> {
    let marks = store.class_term_marks(class_id, term)?;
    let results = calc::rank(
        calc::aggregate_class(&marks, class_id, term, cfg.grade_scale),
        cfg.rank_mode,
    );
    store.replace_class_results(class_id, term, &results)?;
    tracing::debug!(class_id, term = term.index(), students = results.len(), "term results rebuilt");
    Ok(results)
}

/// Runs `f` inside one IMMEDIATE transaction while holding the locks of
/// every listed class+term. Any error rolls the whole write back.
fn write_terms<T>(
    conn: &Connection,
    locks: &TermLocks,
    keys: &[(String, Term)],
    f: impl FnOnce(&Connection) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    locks.with_locks(keys, || {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    })
}

fn write_term<T>(
    conn: &Connection,
    locks: &TermLocks,
    class_id: &str,
    term: Term,
    f: impl FnOnce(&SqliteStore<'_>) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    write_terms(conn, locks, &[(class_id.to_string(), term)], |tx| {
        f(&SqliteStore::new(tx))
    })
}

fn distinct_terms(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> anyhow::Result<Vec<(String, Term)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |r| Ok((r.get::<_, String>(0)?, term_at(r, 1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every class+term that currently has marks.
pub fn scored_terms(conn: &Connection) -> anyhow::Result<Vec<(String, Term)>> {
    distinct_terms(
        conn,
        "SELECT DISTINCT class_id, term FROM marks ORDER BY class_id, term",
        [],
    )
}

/// Upserts one mark, then rebuilds its class+term ranking in the same
/// transaction.
pub fn record_mark(
    conn: &Connection,
    locks: &TermLocks,
    cfg: &ScoringConfig,
    rec: &MarkRecord,
) -> anyhow::Result<WriteOutcome> {
    write_term(conn, locks, &rec.class_id, rec.term, |store| {
        let replaced = store.upsert_mark(rec)?;
        let results = recompute(store, &rec.class_id, rec.term, cfg)?;
        Ok(WriteOutcome {
            changed: replaced,
            results,
        })
    })
}

/// `None` when no such mark exists.
pub fn remove_mark(
    conn: &Connection,
    locks: &TermLocks,
    cfg: &ScoringConfig,
    student_id: &str,
    term: Term,
    subject: &str,
) -> anyhow::Result<Option<WriteOutcome>> {
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM marks WHERE student_id = ? AND term = ? AND subject = ?",
            (student_id, term.index(), subject),
            |r| r.get(0),
        )
        .optional()?;
    let Some(class_id) = class_id else {
        return Ok(None);
    };
    write_term(conn, locks, &class_id, term, |store| {
        let deleted = store.delete_mark(student_id, term, subject)?;
        let results = recompute(store, &class_id, term, cfg)?;
        Ok(Some(WriteOutcome {
            changed: deleted,
            results,
        }))
    })
}

pub fn rebuild_results(
    conn: &Connection,
    locks: &TermLocks,
    cfg: &ScoringConfig,
    class_id: &str,
    term: Term,
) -> anyhow::Result<Vec<TermResult>> {
    write_term(conn, locks, class_id, term, |store| {
        recompute(store, class_id, term, cfg)
    })
}

/// Deletes the student and re-ranks every class+term they had marks in,
/// all in one transaction. Returns the re-ranked keys.
pub fn remove_student(
    conn: &Connection,
    locks: &TermLocks,
    cfg: &ScoringConfig,
    student_id: &str,
) -> anyhow::Result<Vec<(String, Term)>> {
    let affected = distinct_terms(
        conn,
        "SELECT DISTINCT class_id, term FROM marks WHERE student_id = ? ORDER BY class_id, term",
        [student_id],
    )?;
    write_terms(conn, locks, &affected, |tx| {
        let store = SqliteStore::new(tx);
        store.delete_student(student_id)?;
        for (class_id, term) in &affected {
            recompute(&store, class_id, *term, cfg)?;
        }
        Ok(())
    })?;
    Ok(affected)
}

/// Runs `before` (typically persisting a new scoring setup) and regrades
/// every stored class+term under `cfg` as a single write. Returns how many
/// class+terms were rebuilt.
pub fn rescore_all(
    conn: &Connection,
    locks: &TermLocks,
    cfg: &ScoringConfig,
    before: impl FnOnce(&Connection) -> anyhow::Result<()>,
) -> anyhow::Result<usize> {
    let keys = scored_terms(conn)?;
    write_terms(conn, locks, &keys, |tx| {
        before(tx)?;
        let store = SqliteStore::new(tx);
        for (class_id, term) in &keys {
            recompute(&store, class_id, *term, cfg)?;
        }
        Ok(keys.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::GradeScale;
    use crate::config::{self, EngineConfig, SetupSection};
    use crate::db;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn term(n: i64) -> Term {
        Term::new(n).expect("term")
    }

    fn seed_class(conn: &Connection, class_id: &str, students: &[&str]) {
        conn.execute(
            "INSERT INTO classes(id, name) VALUES(?, ?)",
            (class_id, class_id),
        )
        .expect("class");
        for (i, sid) in students.iter().enumerate() {
            conn.execute(
                "INSERT INTO students(id, class_id, name, sort_order) VALUES(?, ?, ?, ?)",
                (sid, class_id, sid, i as i64),
            )
            .expect("student");
        }
    }

    fn mark(student: &str, t: i64, subject: &str, value: f64) -> MarkRecord {
        MarkRecord {
            student_id: student.to_string(),
            class_id: "c1".to_string(),
            term: term(t),
            subject: subject.to_string(),
            mark: value,
        }
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn ranks_follow_averages_with_sequential_ties() {
        let conn = memory_db();
        seed_class(&conn, "c1", &["s1", "s2", "s3", "s4"]);
        let locks = TermLocks::new();
        let cfg = ScoringConfig::default();
        for (sid, v) in [("s1", 60.0), ("s2", 80.0), ("s3", 90.0), ("s4", 80.0)] {
            record_mark(&conn, &locks, &cfg, &mark(sid, 1, "Math", v)).expect("record");
        }
        let stored = SqliteStore::new(&conn)
            .class_results("c1", term(1))
            .expect("results");
        let order: Vec<(&str, usize)> = stored
            .iter()
            .map(|r| (r.student_id.as_str(), r.rank.unwrap_or(0)))
            .collect();
        assert_eq!(order, vec![("s3", 1), ("s2", 2), ("s4", 3), ("s1", 4)]);
    }

    #[test]
    fn overwriting_a_mark_supersedes_it_without_duplicates() {
        let conn = memory_db();
        seed_class(&conn, "c1", &["s1", "s2"]);
        let locks = TermLocks::new();
        let cfg = ScoringConfig::default();
        record_mark(&conn, &locks, &cfg, &mark("s1", 1, "Math", 40.0)).expect("s1");
        record_mark(&conn, &locks, &cfg, &mark("s2", 1, "Math", 70.0)).expect("s2");

        let out = record_mark(&conn, &locks, &cfg, &mark("s1", 1, "Math", 95.0)).expect("again");
        assert!(out.changed);
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].student_id, "s1");
        assert_eq!(out.results[0].average, 95.0);

        let store = SqliteStore::new(&conn);
        let marks = store.student_term_marks("s1", term(1)).expect("marks");
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].mark, 95.0);
        assert_eq!(store.class_results("c1", term(1)).expect("results").len(), 2);
    }

    #[test]
    fn removing_last_mark_drops_student_from_ranking() {
        let conn = memory_db();
        seed_class(&conn, "c1", &["s1", "s2"]);
        let locks = TermLocks::new();
        let cfg = ScoringConfig::default();
        record_mark(&conn, &locks, &cfg, &mark("s1", 1, "Math", 40.0)).expect("s1");
        record_mark(&conn, &locks, &cfg, &mark("s2", 1, "Math", 70.0)).expect("s2");

        let out = remove_mark(&conn, &locks, &cfg, "s2", term(1), "Math")
            .expect("remove")
            .expect("existed");
        assert!(out.changed);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].rank, Some(1));
        assert!(remove_mark(&conn, &locks, &cfg, "s2", term(1), "Math")
            .expect("remove again")
            .is_none());
    }

    #[test]
    fn other_terms_keep_their_results() {
        let conn = memory_db();
        seed_class(&conn, "c1", &["s1"]);
        let locks = TermLocks::new();
        let cfg = ScoringConfig::default();
        record_mark(&conn, &locks, &cfg, &mark("s1", 1, "Math", 40.0)).expect("t1");
        record_mark(&conn, &locks, &cfg, &mark("s1", 2, "Math", 70.0)).expect("t2");
        let results = SqliteStore::new(&conn).student_results("s1").expect("results");
        let terms: Vec<i64> = results.iter().map(|r| r.term.index()).collect();
        assert_eq!(terms, vec![1, 2]);
    }

    fn assert_contiguous_ranks(conn: &Connection, t: i64) {
        let stored = SqliteStore::new(conn)
            .class_results("c1", term(t))
            .expect("results");
        let ranks: Vec<usize> = stored.iter().filter_map(|r| r.rank).collect();
        let expected: Vec<usize> = (1..=stored.len()).collect();
        assert_eq!(ranks, expected, "term {t}");
    }

    /// Makes any rebuild of term 2 fail on insert.
    fn refuse_term_two_results(conn: &Connection) {
        conn.execute_batch(
            "CREATE TRIGGER refuse_t2 BEFORE INSERT ON term_results WHEN NEW.term = 2
             BEGIN SELECT RAISE(ABORT, 'term 2 results refused'); END;",
        )
        .expect("trigger");
    }

    fn seed_two_terms(conn: &Connection, locks: &TermLocks, cfg: &ScoringConfig) {
        seed_class(conn, "c1", &["s1", "s2", "s3", "s4"]);
        for (sid, t1, t2) in [("s1", 90.0, 55.0), ("s2", 85.0, 95.0), ("s3", 70.0, 75.0), ("s4", 60.0, 65.0)] {
            record_mark(conn, locks, cfg, &mark(sid, 1, "Math", t1)).expect("t1");
            record_mark(conn, locks, cfg, &mark(sid, 2, "Math", t2)).expect("t2");
        }
    }

    #[test]
    fn removing_a_student_reranks_every_term_they_were_in() {
        let conn = memory_db();
        let locks = TermLocks::new();
        let cfg = ScoringConfig::default();
        seed_two_terms(&conn, &locks, &cfg);

        let affected = remove_student(&conn, &locks, &cfg, "s2").expect("remove");
        assert_eq!(affected, vec![("c1".to_string(), term(1)), ("c1".to_string(), term(2))]);
        for t in [1, 2] {
            assert_contiguous_ranks(&conn, t);
        }
        let store = SqliteStore::new(&conn);
        assert_eq!(store.student_class("s2").expect("lookup"), None);
        assert!(store.student_marks("s2").expect("marks").is_empty());
        let t2 = store.class_results("c1", term(2)).expect("t2");
        assert_eq!(t2[0].student_id, "s3");
        assert_eq!(t2.len(), 3);
    }

    #[test]
    fn failed_rerank_rolls_back_student_removal() {
        let conn = memory_db();
        let locks = TermLocks::new();
        let cfg = ScoringConfig::default();
        seed_two_terms(&conn, &locks, &cfg);
        let before = SqliteStore::new(&conn).class_results("c1", term(1)).expect("t1");
        refuse_term_two_results(&conn);

        assert!(remove_student(&conn, &locks, &cfg, "s2").is_err());

        let store = SqliteStore::new(&conn);
        assert_eq!(store.student_class("s2").expect("lookup"), Some("c1".to_string()));
        assert_eq!(store.student_marks("s2").expect("marks").len(), 2);
        assert_eq!(store.class_results("c1", term(1)).expect("t1"), before);
        for t in [1, 2] {
            assert_contiguous_ranks(&conn, t);
        }
    }

    #[test]
    fn rescore_saves_setup_and_regrades_every_term_together() {
        let conn = memory_db();
        let locks = TermLocks::new();
        let coarse = ScoringConfig::default();
        seed_two_terms(&conn, &locks, &coarse);

        let mut cfg = EngineConfig::default();
        cfg.scoring.grade_scale = GradeScale::Fine;
        let rebuilt = rescore_all(&conn, &locks, &cfg.scoring, |tx| {
            config::save_section(tx, &cfg, SetupSection::Scoring)
        })
        .expect("rescore");
        assert_eq!(rebuilt, 2);
        assert_eq!(config::load(&conn).expect("load").scoring.grade_scale, GradeScale::Fine);
        let store = SqliteStore::new(&conn);
        for t in [1, 2] {
            let results = store.class_results("c1", term(t)).expect("results");
            assert!(results.iter().all(|r| r.points.is_some()), "term {t}");
            assert_contiguous_ranks(&conn, t);
        }
    }

    #[test]
    fn failed_regrade_keeps_previous_setup_and_grades() {
        let conn = memory_db();
        let locks = TermLocks::new();
        let coarse = ScoringConfig::default();
        seed_two_terms(&conn, &locks, &coarse);
        refuse_term_two_results(&conn);

        let mut cfg = EngineConfig::default();
        cfg.scoring.grade_scale = GradeScale::Fine;
        let out = rescore_all(&conn, &locks, &cfg.scoring, |tx| {
            config::save_section(tx, &cfg, SetupSection::Scoring)
        });
        assert!(out.is_err());

        assert_eq!(config::load(&conn).expect("load").scoring.grade_scale, GradeScale::Coarse);
        let store = SqliteStore::new(&conn);
        for t in [1, 2] {
            let results = store.class_results("c1", term(t)).expect("results");
            assert_eq!(results.len(), 4);
            assert!(results.iter().all(|r| r.points.is_none()), "term {t}");
        }
    }

    #[test]
    fn concurrent_writers_on_one_term_do_not_lose_rankings() {
        let workspace: PathBuf = std::env::temp_dir().join(format!(
            "scorebook-store-race-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let students: Vec<String> = (0..6).map(|i| format!("s{i}")).collect();
        {
            let conn = db::open_db(&workspace).expect("open");
            let ids: Vec<&str> = students.iter().map(|s| s.as_str()).collect();
            seed_class(&conn, "c1", &ids);
        }

        let locks = Arc::new(TermLocks::new());
        let handles: Vec<_> = students
            .iter()
            .enumerate()
            .map(|(i, sid)| {
                let locks = Arc::clone(&locks);
                let workspace = workspace.clone();
                let sid = sid.clone();
                std::thread::spawn(move || {
                    let conn = db::open_db(&workspace).expect("open");
                    let cfg = ScoringConfig::default();
                    for (j, subject) in ["English", "Math", "Science"].iter().enumerate() {
                        let value = 40.0 + (i * 7 + j * 3) as f64;
                        record_mark(&conn, &locks, &cfg, &mark(&sid, 1, subject, value))
                            .expect("record");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("writer thread");
        }

        let conn = db::open_db(&workspace).expect("open");
        let store = SqliteStore::new(&conn);
        let stored = store.class_results("c1", term(1)).expect("stored");
        let marks = store.class_term_marks("c1", term(1)).expect("marks");
        let fresh = calc::rank(
            calc::aggregate_class(&marks, "c1", term(1), ScoringConfig::default().grade_scale),
            ScoringConfig::default().rank_mode,
        );
        assert_eq!(marks.len(), 18);
        assert_eq!(stored.len(), students.len());
        assert_eq!(stored, fresh);
        assert!(stored.iter().all(|r| r.subject_count == 3));
    }
}
