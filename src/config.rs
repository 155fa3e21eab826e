//! Projection options — `tswinmd.toml`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Projection policy switches and output settings.
///
/// All fields are optional in the TOML file; the defaults match the stock
/// projection (exclusive interfaces suppressed, decorators and shims on).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Project interfaces that exist only to carry a class's members.
    pub include_exclusive: bool,
    /// Project types marked `WebHostHiddenAttribute`.
    pub allow_web_host_hidden: bool,
    /// Emit `@GenerateShim`/`@Enumerable` decorators.
    pub enable_decorators: bool,
    /// Emit the `@GenerateShim('<fully-qualified>')` class decorator.
    /// Only effective together with `enable_decorators`.
    pub generate_shims: bool,
    /// Assembly version printed in generated file banners, as
    /// `major.minor.build.revision`. Defaults to `0.0.0.0`.
    pub version: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            include_exclusive: false,
            allow_web_host_hidden: false,
            enable_decorators: true,
            generate_shims: true,
            version: None,
        }
    }
}

impl Options {
    /// Parse the `version` override into a `major.minor.build.revision`
    /// tuple. Absent components default to zero.
    pub fn version_tuple(&self) -> Result<(u16, u16, u16, u16)> {
        let Some(version) = &self.version else {
            return Ok((0, 0, 0, 0));
        };
        let mut parts = [0u16; 4];
        for (i, part) in version.split('.').enumerate() {
            if i >= parts.len() {
                anyhow::bail!("version `{version}` has more than four components");
            }
            parts[i] = part
                .parse()
                .with_context(|| format!("parsing version component `{part}` of `{version}`"))?;
        }
        Ok((parts[0], parts[1], parts[2], parts[3]))
    }
}

/// Load and parse a `tswinmd.toml` options file.
pub fn load_options(path: &Path) -> Result<Options> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading options file {}", path.display()))?;
    let options: Options = toml::from_str(&content)
        .with_context(|| format!("parsing options file {}", path.display()))?;
    Ok(options)
}
