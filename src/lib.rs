//! tswinmd — WinRT metadata → TypeScript projection generator.
//!
//! Reads ECMA-335 `.winmd` files via the `windows-metadata` reader and
//! writes a TypeScript surface for every public WinRT type, one file per
//! type under a namespace-shaped directory tree, plus a module `index.ts`
//! that re-exports the assembly as nested namespaces.
//!
//! # Quick start
//!
//! Project a metadata file into the current directory:
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//!
//! let options = tswinmd::config::Options::default();
//! tswinmd::run(&[PathBuf::from("Windows.winmd")], &options, Path::new(".")).unwrap();
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

pub mod cache;
pub mod config;
pub mod policy;
pub mod semantics;
pub mod writer;

/// Run the full pipeline: load the metadata cache, write one file per
/// projectable type, then write the module index.
///
/// `metadata` is the list of `.winmd` files to project; `out_dir` is the
/// directory the assembly tree is created under (typically the working
/// directory).
///
/// Returns the assembly output directory.
pub fn run(metadata: &[PathBuf], options: &config::Options, out_dir: &Path) -> Result<PathBuf> {
    let cache = cache::TypeCache::load(metadata, options.version_tuple()?)?;
    info!(
        assembly = %cache.assembly().name,
        files = metadata.len(),
        "loaded metadata"
    );

    let mut writer = writer::Writer::new(&cache, options, out_dir);
    writer.write()?;

    let base = writer.base_path().to_path_buf();
    info!(path = %base.display(), "wrote projection");
    Ok(base)
}
