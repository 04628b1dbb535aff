//! # Test Descriptor Store / 测试描述存储
//!
//! Loads the declarative test matrix from a TOML or JSON file, or from a
//! directory of such files, and validates it into immutable
//! [`TestDescriptor`]s plus run [`Settings`].
//!
//! 从 TOML 或 JSON 文件（或包含此类文件的目录）加载声明式测试矩阵，
//! 并将其验证为不可变的 [`TestDescriptor`] 以及运行 [`Settings`]。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::ConfigError;
use crate::core::models::{Backend, JobStatus, RuntimeClass};

/// Default matrix file name looked up by the CLI.
pub const DEFAULT_MATRIX_FILE: &str = "TestMatrix.toml";

/// A single test bench together with the axes it can be run across.
/// Immutable once loaded.
///
/// 一个测试平台以及它可以运行的参数轴。加载后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestDescriptor {
    /// Unique test name. Used as the cocotb `TESTCASE`.
    pub name: String,
    /// Test bench location, resolved against the matrix file's directory.
    pub path: PathBuf,
    /// Simulators this test bench supports.
    pub backends: BTreeSet<Backend>,
    /// Axis name to the ordered values this test runs with.
    pub parameters: BTreeMap<String, Vec<String>>,
    pub runtime: RuntimeClass,
    pub tags: BTreeSet<String>,
    /// Overrides the run-wide timeout for this test.
    pub timeout_secs: Option<u64>,
    pub env: BTreeMap<String, String>,
}

/// Container wrapping for simulator invocations.
///
/// The image itself is built and published elsewhere; only `run` is issued.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Extra host directories mounted at the same path inside the container.
    #[serde(default)]
    pub mounts: Vec<PathBuf>,
    /// Extra arguments passed to `<engine> run` before the image name.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_engine() -> String {
    "docker".to_string()
}

/// Per-backend command override.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Command template; see `core::execution` for the supported placeholders.
    pub command: String,
}

/// Run-wide settings from the `[settings]` table. Every field is optional;
/// CLI flags take precedence over these, which take precedence over defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    /// Statuses that trigger a retry. Defaults to `["TIMEOUT"]`.
    pub retry_on: Option<Vec<JobStatus>>,
    pub slow_timeout_factor: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub report: Option<PathBuf>,
    pub container: Option<ContainerConfig>,
}

/// The validated contents of a matrix source.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    /// The file or directory this configuration was loaded from.
    pub source: PathBuf,
    /// Descriptors sorted by name.
    pub descriptors: Vec<TestDescriptor>,
    pub axes: BTreeMap<String, Vec<String>>,
    pub backends: BTreeMap<Backend, BackendConfig>,
    pub settings: Settings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatrixFile {
    #[serde(default)]
    settings: Option<Settings>,
    #[serde(default)]
    backends: BTreeMap<String, BackendConfig>,
    #[serde(default)]
    axes: BTreeMap<String, Vec<ScalarValue>>,
    #[serde(default)]
    tests: Vec<RawDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    name: String,
    path: PathBuf,
    backends: Vec<String>,
    #[serde(default)]
    parameters: BTreeMap<String, Vec<ScalarValue>>,
    #[serde(default)]
    runtime: RuntimeClass,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

/// Parameter values may be written as strings, integers, floats or booleans;
/// they are carried as strings from here on.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ScalarValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ScalarValue {
    fn into_string(self) -> String {
        match self {
            ScalarValue::Str(s) => s,
            ScalarValue::Int(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Bool(b) => b.to_string(),
        }
    }
}

/// Loads and validates a matrix source.
///
/// `source` may be a `.toml`/`.json` file or a directory; directory entries
/// with those extensions are merged in file-name order. Test names must be
/// unique across all files.
///
/// # Errors
/// `ConfigError::MalformedDescriptor` on duplicate names, undefined axes,
/// undeclared axis values, empty value lists or missing backends;
/// `Io`/`Parse` when the source cannot be read.
pub fn load(source: &Path) -> Result<MatrixConfig, ConfigError> {
    let files = collect_files(source)?;
    let mut merged = MatrixConfig {
        source: source.to_path_buf(),
        descriptors: Vec::new(),
        axes: BTreeMap::new(),
        backends: BTreeMap::new(),
        settings: Settings::default(),
    };
    let mut settings_origin: Option<PathBuf> = None;
    let mut raw_tests: Vec<(PathBuf, RawDescriptor)> = Vec::new();

    for file in &files {
        let parsed = parse_file(file)?;
        let base_dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(settings) = parsed.settings {
            if let Some(previous) = &settings_origin {
                return Err(ConfigError::Parse {
                    path: file.clone(),
                    message: format!("[settings] already defined in {}", previous.display()),
                });
            }
            merged.settings = settings;
            settings_origin = Some(file.clone());
        }

        for (axis, values) in parsed.axes {
            let values: Vec<String> = values.into_iter().map(ScalarValue::into_string).collect();
            match merged.axes.get(&axis) {
                Some(existing) if *existing != values => {
                    return Err(ConfigError::Parse {
                        path: file.clone(),
                        message: format!("axis '{axis}' redefined with different values"),
                    });
                }
                _ => {
                    merged.axes.insert(axis, values);
                }
            }
        }

        for (name, backend_config) in parsed.backends {
            let backend: Backend = name.parse()?;
            if merged.backends.insert(backend, backend_config).is_some() {
                return Err(ConfigError::Parse {
                    path: file.clone(),
                    message: format!("backend '{backend}' configured more than once"),
                });
            }
        }

        raw_tests.extend(parsed.tests.into_iter().map(|t| (base_dir.clone(), t)));
    }

    for (axis, values) in &merged.axes {
        if values.is_empty() {
            return Err(ConfigError::Parse {
                path: source.to_path_buf(),
                message: format!("axis '{axis}' declares no values"),
            });
        }
    }

    let mut seen = BTreeSet::new();
    for (base_dir, raw) in raw_tests {
        let descriptor = validate_descriptor(raw, &base_dir, &merged.axes)?;
        if !seen.insert(descriptor.name.clone()) {
            return Err(ConfigError::malformed(&descriptor.name, "duplicate test name"));
        }
        merged.descriptors.push(descriptor);
    }
    merged.descriptors.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::debug!(
        source = %source.display(),
        files = files.len(),
        descriptors = merged.descriptors.len(),
        "loaded test matrix"
    );
    Ok(merged)
}

fn collect_files(source: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let io_err = |e| ConfigError::Io {
        path: source.to_path_buf(),
        source: e,
    };
    let metadata = fs::metadata(source).map_err(io_err)?;
    if !metadata.is_dir() {
        return Ok(vec![source.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(source).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_matrix = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("toml") | Some("json")
        );
        if path.is_file() && is_matrix {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(ConfigError::Parse {
            path: source.to_path_buf(),
            message: "directory contains no .toml or .json matrix files".to_string(),
        });
    }
    Ok(files)
}

fn parse_file(path: &Path) -> Result<MatrixFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
        _ => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
    }
}

fn validate_descriptor(
    raw: RawDescriptor,
    base_dir: &Path,
    axes: &BTreeMap<String, Vec<String>>,
) -> Result<TestDescriptor, ConfigError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(ConfigError::malformed("<unnamed>", "test name is empty"));
    }
    if raw.backends.is_empty() {
        return Err(ConfigError::malformed(&name, "no simulator backends declared"));
    }
    if raw.timeout_secs == Some(0) {
        return Err(ConfigError::malformed(&name, "timeout_secs must be positive"));
    }

    let mut backends = BTreeSet::new();
    for backend in &raw.backends {
        let backend = backend
            .parse::<Backend>()
            .map_err(|e| ConfigError::malformed(&name, e.to_string()))?;
        backends.insert(backend);
    }

    let mut parameters = BTreeMap::new();
    for (axis, values) in raw.parameters {
        let Some(declared) = axes.get(&axis) else {
            return Err(ConfigError::malformed(
                &name,
                format!("parameter references undefined axis '{axis}'"),
            ));
        };
        if values.is_empty() {
            return Err(ConfigError::malformed(
                &name,
                format!("parameter '{axis}' has no values"),
            ));
        }
        let mut unique = BTreeSet::new();
        let mut ordered = Vec::with_capacity(values.len());
        for value in values.into_iter().map(ScalarValue::into_string) {
            if !declared.contains(&value) {
                return Err(ConfigError::malformed(
                    &name,
                    format!("value '{value}' is not declared for axis '{axis}'"),
                ));
            }
            if !unique.insert(value.clone()) {
                return Err(ConfigError::malformed(
                    &name,
                    format!("value '{value}' listed twice for axis '{axis}'"),
                ));
            }
            ordered.push(value);
        }
        parameters.insert(axis, ordered);
    }

    let path = if raw.path.is_absolute() {
        raw.path
    } else {
        base_dir.join(raw.path)
    };

    Ok(TestDescriptor {
        name,
        path,
        backends,
        parameters,
        runtime: raw.runtime,
        tags: raw.tags.into_iter().collect(),
        timeout_secs: raw.timeout_secs,
        env: raw.env,
    })
}

/// A commented starter matrix written by `verif-matrix init`.
pub const SAMPLE_MATRIX: &str = r#"# Verification matrix for verif-matrix.
# Every [[tests]] entry is expanded across its backends and parameter axes.

[settings]
concurrency = 4
timeout_secs = 900
retries = 1
output_dir = "sim_runs"

# [settings.container]
# image = "chipfoundry/dv:cocotb"

# [backends.icarus]
# command = "make -C {path} SIM=icarus TESTCASE={name} SIM_BUILD={job_dir}/sim_build"

[axes]
corner = ["rtl", "gl"]

[[tests]]
name = "smoke"
path = "verilog/dv/cocotb/smoke"
backends = ["icarus", "verilator"]
parameters = { corner = ["rtl"] }
runtime = "fast"
tags = ["smoke"]
"#;
