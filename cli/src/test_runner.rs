use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use runtime::{Engine, EngineConfig, MemoryReader, RenderError, RuntimeValue};

use crate::toml_to_runtime;

/// Identity the template under test is registered with.
const MAIN: &str = "main.tpl";

#[derive(Debug, Deserialize)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Run parameters.
    #[serde(default)]
    pub params: toml::Table,

    /// Expected exact output (trimmed comparison).
    #[serde(default)]
    pub expect_output: Option<String>,

    /// The render error's Display string must contain this substring.
    #[serde(default)]
    pub expect_error: Option<String>,

    /// If true, the test expects compilation to fail.
    #[serde(default)]
    pub expect_compile_error: bool,

    /// Render without a run queue.
    #[serde(default)]
    pub sync: bool,

    /// Other templates the one under test may embed or extend, by identity.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// Parse a `.test.tpl` file into its TOML config and template source.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}');
    let body = strip_line(content, "---").ok_or("missing opening --- frontmatter delimiter")?;
    let (frontmatter, rest) = body
        .split_once("\n---")
        .ok_or("missing closing --- frontmatter delimiter")?;
    let source = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);

    let config: TestConfig = toml::from_str(frontmatter.trim_end_matches('\r'))
        .map_err(|e| format!("TOML parse error: {}", e))?;
    Ok((config, source))
}

/// `text` after a first line equal to `line`.
fn strip_line<'a>(text: &'a str, line: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(line)?;
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

fn run_single_test(path: &Path, engine_config: &EngineConfig) -> TestResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            return TestResult {
                path: path.to_path_buf(),
                description: None,
                outcome: TestOutcome::Fail(format!("cannot read file: {}", e)),
            };
        }
    };

    let (config, source) = match parse_test_file(&content) {
        Ok(pair) => pair,
        Err(e) => {
            return TestResult {
                path: path.to_path_buf(),
                description: None,
                outcome: TestOutcome::Fail(format!("frontmatter error: {}", e)),
            };
        }
    };

    let description = config.description.clone();
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome: match check(&config, source, engine_config) {
            None => TestOutcome::Pass,
            Some(reason) => TestOutcome::Fail(reason),
        },
    }
}

/// Render `source` as configured and compare against the expectations.
/// Returns `Some(reason)` on mismatch.
fn check(config: &TestConfig, source: &str, engine_config: &EngineConfig) -> Option<String> {
    let reader = MemoryReader::new().with(MAIN, source);
    for (identity, text) in &config.files {
        reader.insert(identity.as_str(), text.as_str());
    }
    let engine = Engine::builder()
        .config(engine_config.clone())
        .reader(reader)
        .build();

    let params = RuntimeValue::object(
        config.params.iter().map(|(k, v)| (k.clone(), toml_to_runtime(v))),
    );
    let rendered = if config.sync {
        engine.run_source_sync(source, params)
    } else {
        engine.render_blocking(MAIN, params)
    };

    if config.expect_compile_error {
        return match rendered.error {
            Some(RenderError::Compile(_)) => None,
            Some(other) => Some(format!("expected compile error, got: {}", other)),
            None => Some("expected compile error, but compilation succeeded".into()),
        };
    }

    match (&config.expect_error, &config.expect_output, rendered.error) {
        (Some(expected_err), _, Some(error)) => {
            let err_str = error.to_string();
            if err_str.contains(expected_err.as_str()) {
                None
            } else {
                Some(format!(
                    "expected error containing \"{}\", got: {}",
                    expected_err, err_str
                ))
            }
        }
        (Some(expected_err), _, None) => Some(format!(
            "expected error containing \"{}\", but rendering succeeded",
            expected_err
        )),
        (None, _, Some(error)) => Some(format!("unexpected render error: {}", error)),
        (None, Some(expected_output), None) => {
            let actual = rendered.content.trim();
            let expected = expected_output.trim();
            if actual == expected {
                None
            } else {
                Some(format!(
                    "output mismatch\n  expected: {:?}\n  actual:   {:?}",
                    expected, actual
                ))
            }
        }
        (None, None, None) => None,
    }
}

/// `.test.tpl` files under `root`, grouped by the subfolder they sit in.
/// Files directly in `root` get the empty category.
fn discover(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(".test.tpl"))
        {
            let category = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            out.entry(category).or_default().push(path);
        }
    }
}

fn category_label(category: &str) -> &str {
    if category.is_empty() { "(root)" } else { category }
}

pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }
    let categories = discover(path);
    if categories.is_empty() {
        eprintln!("no .test.tpl files found in {}", path.display());
        return;
    }
    eprintln!("available categories:");
    for (category, files) in &categories {
        eprintln!("  {} ({} tests)", category_label(category), files.len());
    }
}

/// Keep the categories named in `wanted` and their subfolders.
fn select<'a>(
    all: &'a BTreeMap<String, Vec<PathBuf>>,
    wanted: &[String],
) -> BTreeMap<&'a str, &'a [PathBuf]> {
    let mut selected = BTreeMap::new();
    for (category, files) in all {
        let keep = wanted.is_empty()
            || wanted.iter().any(|w| {
                let w = w.trim_matches('/');
                category == w || category.starts_with(&format!("{}/", w))
            });
        if keep {
            selected.insert(category.as_str(), files.as_slice());
        }
    }
    for w in wanted {
        let w = w.trim_matches('/');
        if !selected.keys().any(|c| *c == w || c.starts_with(&format!("{}/", w))) {
            eprintln!("warning: category '{}' not found", w);
        }
    }
    selected
}

fn paint(text: &str, code: &str, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    }
}

/// Run every `.test.tpl` under `path`, or `path` itself when it is a file.
/// Returns the process exit code.
pub fn run_tests(path: &Path, config: &EngineConfig, no_color: bool, categories: &[String]) -> i32 {
    let all = if path.is_file() {
        BTreeMap::from([(String::new(), vec![path.to_path_buf()])])
    } else {
        discover(path)
    };
    if all.is_empty() {
        eprintln!("no .test.tpl files found in {}", path.display());
        return 1;
    }
    let selected = select(&all, categories);
    if selected.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (category, files) in &selected {
        eprintln!();
        eprintln!("{}", paint(category_label(category), "1", no_color));
        for file in *files {
            let result = run_single_test(file, config);
            let label = result
                .description
                .clone()
                .or_else(|| file.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .unwrap_or_else(|| "?".to_string());
            match result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", paint("PASS", "32", no_color), label);
                }
                TestOutcome::Fail(_) => {
                    eprintln!("  {}  {}", paint("FAIL", "31", no_color), label);
                    failures.push(result);
                }
            }
        }
    }

    if !failures.is_empty() {
        eprintln!();
        eprintln!("failures:");
        for failure in &failures {
            eprintln!();
            eprintln!("  --- {} ---", failure.path.display());
            if let TestOutcome::Fail(reason) = &failure.outcome {
                for line in reason.lines() {
                    eprintln!("  {}", line);
                }
            }
        }
    }

    eprintln!();
    if failures.is_empty() {
        eprintln!("test result: {}. {} passed, 0 failed", paint("ok", "32", no_color), passed);
        0
    } else {
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            paint("FAILED", "31", no_color),
            passed,
            failures.len(),
            passed + failures.len()
        );
        1
    }
}
