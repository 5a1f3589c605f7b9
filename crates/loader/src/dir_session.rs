use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, warn};

use crate::error::SessionError;
use crate::session::{CopyOutcome, Session, SessionFactory};
use crate::stream::CopyStream;

const PART_EXT: &str = "part";
const DATA_EXT: &str = "jsonl";

/// A destination that stores every table as a set of JSON-lines files in
/// one directory.
///
/// Files are named `<schema>.<table>.<tag>.jsonl`. A streaming load writes
/// a `.part` file that becomes visible on commit.
#[derive(Debug, Clone)]
pub struct DirSessionFactory {
    dir: PathBuf,
}

impl DirSessionFactory {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move the committed files of `temp` into `table`. Returns the number
    /// of files moved.
    pub fn promote(&self, schema: &str, temp: &str, table: &str) -> io::Result<usize> {
        let from = target_prefix(schema, temp);
        let mut moved = 0;

        for (path, name) in entries(&self.dir)? {
            let Some(tag) = data_tag(&name, &from) else {
                continue;
            };
            let dest = self
                .dir
                .join(format!("{}{temp}-{tag}.{DATA_EXT}", target_prefix(schema, table)));
            fs::rename(&path, &dest)?;
            moved += 1;
        }

        debug!("promoted {moved} files from {schema}.{temp} to {schema}.{table}");
        Ok(moved)
    }

    /// Delete every file, committed or not, of `temp`.
    pub fn discard(&self, schema: &str, temp: &str) -> io::Result<usize> {
        let prefix = target_prefix(schema, temp);
        let mut removed = 0;

        for (path, name) in entries(&self.dir)? {
            if name.starts_with(&prefix) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        debug!("discarded {removed} files of {schema}.{temp}");
        Ok(removed)
    }

    /// Number of committed rows in `table`.
    pub fn count(&self, schema: &str, table: &str) -> io::Result<u64> {
        count_rows(&self.dir, &target_prefix(schema, table))
    }
}

impl SessionFactory for DirSessionFactory {
    type Session = DirSession;

    fn connect(&self, worker: usize) -> Result<DirSession, SessionError> {
        if !self.dir.is_dir() {
            return Err(SessionError::Connect(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        Ok(DirSession {
            dir: self.dir.clone(),
            worker,
            seq: 0,
            pending: Vec::new(),
        })
    }
}

pub struct DirSession {
    dir: PathBuf,
    worker: usize,
    seq: usize,
    /// `.part` files written since the last commit or rollback.
    pending: Vec<PathBuf>,
}

impl DirSession {
    fn discard_pending(&mut self) -> Result<(), SessionError> {
        for path in self.pending.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Session for DirSession {
    /// Only `SELECT COUNT(*) FROM <target>` is understood.
    fn query(&mut self, sql: &str) -> Result<Vec<Vec<String>>, SessionError> {
        const COUNT: &str = "SELECT COUNT(*) FROM ";

        let sql = sql.trim();
        if !sql.to_ascii_uppercase().starts_with(COUNT) {
            return Err(SessionError::Statement(format!("unsupported query: {sql}")));
        }

        let target = unquote(sql[COUNT.len()..].trim());
        let rows = count_rows(&self.dir, &format!("{target}."))?;
        Ok(vec![vec![rows.to_string()]])
    }

    fn streaming_load(
        &mut self,
        sql: &str,
        stream: &mut CopyStream,
    ) -> Result<CopyOutcome, SessionError> {
        let target = copy_target(sql)
            .ok_or_else(|| SessionError::Statement(format!("not a COPY statement: {sql}")))?;
        let abort_on_error = sql.contains(" ABORT ON ERROR");

        let reader: Box<dyn Read + '_> = if sql.contains(" GZIP") {
            Box::new(GzDecoder::new(stream))
        } else {
            Box::new(stream)
        };

        let path = self.dir.join(format!(
            "{target}.w{}-{}.{PART_EXT}",
            self.worker, self.seq
        ));
        self.seq += 1;
        self.pending.push(path.clone());

        let mut out = BufWriter::new(File::create(&path)?);
        let mut outcome = CopyOutcome::default();

        for (row, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let is_object = serde_json::from_str::<serde_json::Value>(&line)
                .map(|v| v.is_object())
                .unwrap_or(false);

            if is_object {
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
                outcome.accepted += 1;
            } else if abort_on_error {
                return Err(SessionError::Statement(format!(
                    "row {row} rejected by parser"
                )));
            } else {
                outcome.rejected.push(row as u64);
            }
        }

        out.flush()?;
        Ok(outcome)
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        for part in self.pending.drain(..) {
            fs::rename(&part, part.with_extension(DATA_EXT))?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        self.discard_pending()
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if !self.pending.is_empty() {
            warn!("closing with {} uncommitted files", self.pending.len());
        }
        self.discard_pending()
    }
}

fn target_prefix(schema: &str, table: &str) -> String {
    format!("{schema}.{table}.")
}

/// `"schema"."table"` out of `COPY "schema"."table" FROM ...`, unquoted.
fn copy_target(sql: &str) -> Option<String> {
    let rest = sql.trim_start().strip_prefix("COPY ")?;
    let end = rest.find(" FROM ")?;
    Some(unquote(rest[..end].trim()))
}

fn unquote(ident: &str) -> String {
    ident.replace('"', "")
}

/// Tag of a committed data file of the target with `prefix`.
fn data_tag<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix)?
        .strip_suffix(DATA_EXT)?
        .strip_suffix('.')
}

fn entries(dir: &Path) -> io::Result<Vec<(PathBuf, String)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Ok(name) = entry.file_name().into_string() {
            out.push((entry.path(), name));
        }
    }
    out.sort();
    Ok(out)
}

fn count_rows(dir: &Path, prefix: &str) -> io::Result<u64> {
    let mut rows = 0;
    for (path, name) in entries(dir)? {
        if data_tag(&name, prefix).is_some() {
            rows += BufReader::new(File::open(path)?).lines().count() as u64;
        }
    }
    Ok(rows)
}

#[cfg(test)]
#[path = "dir_session_tests.rs"]
mod tests;
