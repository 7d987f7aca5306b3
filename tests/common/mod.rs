#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// The daemon under test, driven one JSON line at a time.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_reportcardd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn reportcardd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns the daemon and points it at `workspace`, creating the database.
    pub fn with_workspace(workspace: &Path) -> Self {
        let mut sidecar = Self::spawn();
        sidecar.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        sidecar
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Asserts the request fails and returns its error code.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Roster rows written straight into the workspace database.
pub struct Roster {
    pub class_id: String,
    pub term_id: String,
    pub students: Vec<String>,
    pub subjects: Vec<String>,
}

pub fn open_workspace_db(workspace: &Path) -> Connection {
    Connection::open(workspace.join("reportcard.sqlite3")).expect("open workspace db")
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One class and term with `student_count` students, each enrolled in every subject.
/// Student ids sort in creation order.
pub fn seed_roster(workspace: &Path, student_count: usize, subject_codes: &[&str]) -> Roster {
    let conn = open_workspace_db(workspace);
    let class_id = new_id();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, "Grade 7 Blue"),
    )
    .expect("insert class");
    let term_id = new_id();
    conn.execute(
        "INSERT INTO terms(id, name, starts_on, ends_on, sort_order) VALUES(?, ?, ?, ?, 0)",
        (&term_id, "First Term 2025", "2025-01-06", "2025-04-04"),
    )
    .expect("insert term");

    let mut subjects = Vec::new();
    for (i, code) in subject_codes.iter().enumerate() {
        let id = new_id();
        conn.execute(
            "INSERT INTO subjects(id, class_id, code, name, sort_order) VALUES(?, ?, ?, ?, ?)",
            (&id, &class_id, *code, format!("{} subject", code), i as i64),
        )
        .expect("insert subject");
        subjects.push(id);
    }

    let mut students = Vec::new();
    for i in 0..student_count {
        let id = format!("stu-{:03}-{}", i, new_id());
        conn.execute(
            "INSERT INTO students(id, class_id, last_name, first_name, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (&id, &class_id, format!("Last{}", i), format!("First{}", i), i as i64),
        )
        .expect("insert student");
        for subject_id in &subjects {
            conn.execute(
                "INSERT INTO enrollments(class_id, student_id, subject_id) VALUES(?, ?, ?)",
                (&class_id, &id, subject_id),
            )
            .expect("insert enrollment");
        }
        students.push(id);
    }

    Roster {
        class_id,
        term_id,
        students,
        subjects,
    }
}

impl Roster {
    pub fn record(
        &self,
        sidecar: &mut Sidecar,
        student: usize,
        subject: usize,
        category: &str,
        raw_score: f64,
        max_score: f64,
    ) -> serde_json::Value {
        sidecar.request_ok(
            "scores.record",
            json!({
                "studentId": self.students[student],
                "subjectId": self.subjects[subject],
                "classId": self.class_id,
                "termId": self.term_id,
                "category": category,
                "rawScore": raw_score,
                "maxScore": max_score,
            }),
        )
    }

    pub fn student_params(&self, student: usize) -> serde_json::Value {
        json!({
            "studentId": self.students[student],
            "classId": self.class_id,
            "termId": self.term_id,
        })
    }

    pub fn class_params(&self) -> serde_json::Value {
        json!({ "classId": self.class_id, "termId": self.term_id })
    }
}
