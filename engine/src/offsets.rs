//! Flat retrieval files and their offset maps.
//!
//! A scored shard is rewritten as lines:
//!
//! ```text
//! $cat$
//! 1,0.2821,0 3
//! 3,0.1761,5
//! ```
//!
//! The offset map records, per term, the byte offset of its first posting line
//! and how many posting lines follow, so a lookup is one seek and `count` line
//! reads. Terms are alphanumeric and posting lines start with a digit, so `$`
//! only ever appears on delimiter lines.

use crate::error::IndexError;
use crate::index::{ScoredPosting, TermFile};
use crate::persist::{load_required, load_terms, save_json, IndexPaths};
use crate::shard::ShardKey;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// Where a term's postings start in the flat file and how many there are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, usize)", into = "(u64, usize)")]
pub struct TermOffset {
    pub offset: u64,
    pub count: usize,
}

impl From<(u64, usize)> for TermOffset {
    fn from((offset, count): (u64, usize)) -> Self { Self { offset, count } }
}

impl From<TermOffset> for (u64, usize) {
    fn from(t: TermOffset) -> Self { (t.offset, t.count) }
}

pub type OffsetMap = BTreeMap<String, TermOffset>;

fn posting_line(p: &ScoredPosting) -> String {
    let positions: Vec<String> = p.positions.iter().map(u32::to_string).collect();
    format!("{},{},{}\n", p.doc_id, p.score, positions.join(" "))
}

fn parse_posting_line(line: &str) -> Result<ScoredPosting, String> {
    let mut parts = line.trim_end_matches(['\n', '\r']).splitn(3, ',');
    let doc_id = parts.next().ok_or("missing doc id")?.parse::<u32>().map_err(|e| format!("doc id: {e}"))?;
    let score = parts.next().ok_or("missing score")?.parse::<f64>().map_err(|e| format!("score: {e}"))?;
    let positions = parts
        .next()
        .ok_or("missing positions")?
        .split_whitespace()
        .map(|s| s.parse::<u32>().map_err(|e| format!("position: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ScoredPosting { doc_id, score, positions })
}

/// Write `terms` as a flat file at `path` and return the offsets of every term.
pub fn write_flat(path: &Path, terms: &BTreeMap<String, Vec<ScoredPosting>>) -> Result<OffsetMap> {
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(f);
    let mut offsets = OffsetMap::new();
    let mut pos: u64 = 0;
    for (term, postings) in terms {
        let delimiter = format!("${term}$\n");
        w.write_all(delimiter.as_bytes())?;
        pos += delimiter.len() as u64;
        offsets.insert(term.clone(), TermOffset { offset: pos, count: postings.len() });
        for p in postings {
            let line = posting_line(p);
            w.write_all(line.as_bytes())?;
            pos += line.len() as u64;
        }
    }
    w.flush()?;
    Ok(offsets)
}

/// Seek to `at` and read exactly its postings from an open flat file.
pub fn read_postings<R: BufRead + Seek>(reader: &mut R, at: TermOffset, path: &Path) -> Result<Vec<ScoredPosting>> {
    reader.seek(SeekFrom::Start(at.offset))?;
    let mut out = Vec::with_capacity(at.count);
    let mut line = String::new();
    for i in 0..at.count {
        line.clear();
        let corrupt = |reason: String| IndexError::CorruptPosting { path: path.to_path_buf(), line: i + 1, reason };
        if reader.read_line(&mut line)? == 0 {
            return Err(corrupt("unexpected end of file".into()).into());
        }
        out.push(parse_posting_line(&line).map_err(corrupt)?);
    }
    Ok(out)
}

/// An open flat file for one shard.
pub struct FlatReader {
    path: std::path::PathBuf,
    reader: BufReader<File>,
}

impl FlatReader {
    pub fn open(paths: &IndexPaths, key: ShardKey) -> Result<Self> {
        let path = paths.flat(key);
        if !path.is_file() {
            return Err(IndexError::MissingFile(path).into());
        }
        let reader = BufReader::new(File::open(&path).with_context(|| format!("opening {}", path.display()))?);
        Ok(Self { path, reader })
    }

    pub fn postings(&mut self, at: TermOffset) -> Result<Vec<ScoredPosting>> {
        read_postings(&mut self.reader, at, &self.path)
    }
}

fn compile_shard(paths: &IndexPaths, key: ShardKey) -> Result<usize> {
    let shard: TermFile<ScoredPosting> = load_terms(&paths.shard(key))?;
    let offsets = write_flat(&paths.flat(key), &shard.terms)?;
    save_json(&paths.offsets(key), &offsets)?;
    Ok(offsets.len())
}

/// Compile every scored shard into its flat file and offset map.
pub fn compile_offsets(paths: &IndexPaths) -> Result<usize> {
    let keys: Vec<ShardKey> = ShardKey::all().collect();
    let counts = keys.par_iter().map(|&key| compile_shard(paths, key)).collect::<Result<Vec<_>>>()?;
    let terms: usize = counts.iter().sum();
    tracing::info!(shards = keys.len(), terms, "compiled offset maps");
    Ok(terms)
}

/// Offset maps of every shard. Missing maps are a structural error.
pub fn load_offset_maps(paths: &IndexPaths) -> Result<BTreeMap<ShardKey, OffsetMap>> {
    ShardKey::all()
        .map(|key| -> Result<(ShardKey, OffsetMap)> { Ok((key, load_required(&paths.offsets(key))?)) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::save_terms;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn scored(doc_id: u32, score: f64, positions: &[u32]) -> ScoredPosting {
        ScoredPosting { doc_id, score, positions: positions.to_vec() }
    }

    fn sample() -> BTreeMap<String, Vec<ScoredPosting>> {
        let mut terms = BTreeMap::new();
        terms.insert("cat".to_string(), vec![scored(1, 0.282_106_1, &[0, 3]), scored(3, 0.176_091_259, &[5])]);
        terms.insert("cow".to_string(), vec![scored(2, 1.0 / 3.0, &[])]);
        terms.insert("crab".to_string(), vec![scored(7, 0.0, &[1, 2, 90])]);
        terms
    }

    #[test]
    fn flat_file_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c_tokens.txt");
        let mut terms = BTreeMap::new();
        terms.insert("cat".to_string(), vec![scored(1, 0.5, &[0, 3])]);
        let offsets = write_flat(&path, &terms).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "$cat$\n1,0.5,0 3\n");
        assert_eq!(offsets["cat"], TermOffset { offset: 6, count: 1 });
    }

    #[test]
    fn seek_reads_back_every_term() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c_tokens.txt");
        let terms = sample();
        let offsets = write_flat(&path, &terms).unwrap();
        let mut reader = BufReader::new(File::open(&path).unwrap());
        // read in reverse order to prove nothing depends on scanning forward
        for (term, at) in offsets.iter().rev() {
            assert_eq!(&read_postings(&mut reader, *at, &path).unwrap(), &terms[term]);
        }
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let mut cursor = Cursor::new(b"$cat$\n1,0.5,0\n".to_vec());
        let err = read_postings(&mut cursor, TermOffset { offset: 6, count: 2 }, Path::new("c_tokens.txt")).unwrap_err();
        assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::CorruptPosting { line: 2, .. })));
    }

    #[test]
    fn compiles_every_shard() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        for key in ShardKey::all() {
            let terms = if key == ShardKey::Char('c') { sample() } else { BTreeMap::new() };
            save_terms(&paths.shard(key), terms).unwrap();
        }
        assert_eq!(compile_offsets(&paths).unwrap(), 3);
        let maps = load_offset_maps(&paths).unwrap();
        assert_eq!(maps.len(), ShardKey::COUNT);
        assert_eq!(maps[&ShardKey::Char('c')]["cow"].count, 1);
        let mut flat = FlatReader::open(&paths, ShardKey::Char('c')).unwrap();
        assert_eq!(flat.postings(maps[&ShardKey::Char('c')]["crab"]).unwrap(), sample()["crab"]);
    }
}
