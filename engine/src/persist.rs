use crate::config::StopWordPolicy;
use crate::error::IndexError;
use crate::index::{DocId, PhasedPosting, TermFile};
use crate::links::LinkGraph;
use crate::shard::ShardKey;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, create_dir_all, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

/// doc_id -> url.
pub type DocumentMapping = BTreeMap<DocId, String>;
pub type PageRankScores = BTreeMap<DocId, f64>;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub num_terms: usize,
    pub created_at: String,
    pub version: u32,
}

/// Tokenizer settings an index was built with. Queries against the index
/// must normalize their terms the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFile {
    pub stop_words: StopWordPolicy,
}

/// Locations of every persisted artifact under one index root.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn doc_mapping(&self) -> PathBuf { self.root.join("doc_mapping.json") }
    pub fn links(&self) -> PathBuf { self.root.join("links.json") }
    pub fn pagerank(&self) -> PathBuf { self.root.join("pagerank.json") }
    pub fn df(&self) -> PathBuf { self.root.join("df.json") }
    pub fn idf(&self) -> PathBuf { self.root.join("idf.json") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn analysis(&self) -> PathBuf { self.root.join("analysis.json") }
    pub fn partial_dir(&self) -> PathBuf { self.root.join("partial_indexes") }
    pub fn final_dir(&self) -> PathBuf { self.root.join("final_index") }
    pub fn partial(&self, n: usize) -> PathBuf { self.partial_dir().join(format!("partial_{n:05}.json")) }
    pub fn shard(&self, key: ShardKey) -> PathBuf { self.final_dir().join(format!("{key}_tokens.json")) }
    pub fn flat(&self, key: ShardKey) -> PathBuf { self.final_dir().join(format!("{key}_tokens.txt")) }
    pub fn offsets(&self, key: ShardKey) -> PathBuf { self.final_dir().join(format!("{key}_offsets.json")) }

    /// Partial index files in flush order.
    pub fn partials(&self) -> Result<Vec<PathBuf>> {
        let dir = self.partial_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("listing {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect();
        files.sort();
        Ok(files)
    }
}

pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer(&mut w, value).with_context(|| format!("writing {}", path.display()))?;
    w.flush()?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let value = serde_json::from_reader(BufReader::new(f)).with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

/// Like [`load_json`], but a missing file is the structural [`IndexError::MissingFile`].
pub fn load_required<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(IndexError::MissingFile(path.to_path_buf()).into());
    }
    load_json(path)
}

/// Load a partial or shard file, refusing one written in the other phase.
pub fn load_terms<P: PhasedPosting + DeserializeOwned>(path: &Path) -> Result<TermFile<P>> {
    #[derive(Deserialize)]
    struct Header {
        phase: crate::index::Phase,
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let header: Header = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    if header.phase != P::PHASE {
        return Err(IndexError::PhaseMismatch { path: path.to_path_buf(), expected: P::PHASE, found: header.phase }.into());
    }
    let file = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(file)
}

pub fn save_terms<P: PhasedPosting + Serialize>(path: &Path, terms: BTreeMap<String, Vec<P>>) -> Result<()> {
    save_json(path, &TermFile::new(terms))
}

pub fn save_doc_mapping(paths: &IndexPaths, mapping: &DocumentMapping) -> Result<()> { save_json(&paths.doc_mapping(), mapping) }

pub fn load_doc_mapping(paths: &IndexPaths) -> Result<DocumentMapping> { load_required(&paths.doc_mapping()) }

pub fn save_links(paths: &IndexPaths, graph: &LinkGraph) -> Result<()> { save_json(&paths.links(), graph) }

pub fn load_links(paths: &IndexPaths) -> Result<LinkGraph> { load_required(&paths.links()) }

pub fn save_pagerank(paths: &IndexPaths, scores: &PageRankScores) -> Result<()> { save_json(&paths.pagerank(), scores) }

pub fn load_pagerank(paths: &IndexPaths) -> Result<PageRankScores> { load_required(&paths.pagerank()) }

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let json = serde_json::to_string_pretty(meta)?;
    fs::write(paths.meta(), json)?;
    Ok(())
}

pub fn save_analysis(paths: &IndexPaths, analysis: &AnalysisFile) -> Result<()> { save_json(&paths.analysis(), analysis) }

pub fn load_analysis(paths: &IndexPaths) -> Result<AnalysisFile> { load_required(&paths.analysis()) }

/// Staging directory next to `target`, used so a build never writes into a served index.
pub fn staging_dir(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "index".into());
    name.push(".staging");
    target.with_file_name(name)
}

/// Move a finished build from `staging` over `target`.
///
/// This is two renames, not one: the old index is moved aside, then staging is
/// moved in. Between them `target` does not exist, so a reader opening the index
/// in that window fails with a missing-file error and must retry. Sessions that
/// are already open keep their loaded maps but read flat files by path.
pub fn publish(staging: &Path, target: &Path) -> Result<()> {
    let mut retired_name = target.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "index".into());
    retired_name.push(".retired");
    let retired = target.with_file_name(retired_name);
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    if target.exists() {
        fs::rename(target, &retired).with_context(|| format!("retiring {}", target.display()))?;
    }
    fs::rename(staging, target).with_context(|| format!("publishing {}", staging.display()))?;
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    Ok(())
}
