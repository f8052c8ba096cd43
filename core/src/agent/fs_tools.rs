//! Sandboxed filesystem tools exposed to the agent loop
//!
//! All four tools resolve their paths against a single workspace root. A
//! path that would land outside the root is rejected before any I/O
//! happens. Tool failures are reported back to the model as structured
//! error text; nothing in here aborts an agent turn.

use crate::error::ForemanError;
use crate::llm::ChatTool;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Upper bound on a single read, matching what a model context can absorb
const MAX_READ_BYTES: u64 = 10_000_000;
/// Directory listings are capped so one `ls` of a vendored tree cannot
/// flood the conversation
const MAX_LISTED_DIRS: usize = 200;
const MAX_LISTED_FILES: usize = 400;

/// Outcome of one tool dispatch, already formatted for the model
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// One declared parameter of a tool schema
struct ParamSpec {
    name: &'static str,
    kind: &'static str,
    description: &'static str,
    required: bool,
}

/// One tool the dispatcher knows how to run
struct ToolSpec {
    name: &'static str,
    description: &'static str,
    params: &'static [ParamSpec],
}

const TOOL_SPECS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_directory",
        description: "List the files and subdirectories of a directory inside the workspace",
        params: &[ParamSpec {
            name: "path",
            kind: "string",
            description: "Directory path relative to the workspace root; omit or pass \".\" for the root itself",
            required: false,
        }],
    },
    ToolSpec {
        name: "read_file",
        description: "Read a text file inside the workspace and return its contents",
        params: &[
            ParamSpec {
                name: "path",
                kind: "string",
                description: "File path relative to the workspace root",
                required: true,
            },
            ParamSpec {
                name: "max_bytes",
                kind: "integer",
                description: "Optional cap on how many bytes to return",
                required: false,
            },
        ],
    },
    ToolSpec {
        name: "write_file",
        description: "Create or overwrite a file inside the workspace",
        params: &[
            ParamSpec {
                name: "path",
                kind: "string",
                description: "File path relative to the workspace root",
                required: true,
            },
            ParamSpec {
                name: "content",
                kind: "string",
                description: "Full contents to write",
                required: true,
            },
        ],
    },
    ToolSpec {
        name: "append_file",
        description: "Append text to a file inside the workspace, creating it if needed",
        params: &[
            ParamSpec {
                name: "path",
                kind: "string",
                description: "File path relative to the workspace root",
                required: true,
            },
            ParamSpec {
                name: "content",
                kind: "string",
                description: "Text to append",
                required: true,
            },
        ],
    },
];

fn schema_for(spec: &ToolSpec) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in spec.params {
        properties.insert(
            param.name.to_string(),
            json!({ "type": param.kind, "description": param.description }),
        );
        if param.required {
            required.push(param.name);
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[derive(Deserialize)]
struct PathArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    max_bytes: Option<u64>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

/// Dispatches filesystem tool calls within a fixed workspace root
pub struct FileSystemToolDispatcher {
    root: PathBuf,
    allow_writes: bool,
}

impl FileSystemToolDispatcher {
    /// Create the sandbox root if needed and pin it to its canonical form
    pub fn new(root: impl Into<PathBuf>, allow_writes: bool) -> crate::error::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root, allow_writes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn writes_enabled(&self) -> bool {
        self.allow_writes
    }

    /// Declarations for every tool, in the wire shape the model expects
    pub fn tool_definitions(&self) -> Vec<ChatTool> {
        TOOL_SPECS
            .iter()
            .map(|spec| ChatTool::function(spec.name, spec.description, schema_for(spec)))
            .collect()
    }

    /// Run one tool call. Unknown names and bad arguments come back as
    /// error outputs, never as an Err.
    pub async fn dispatch(&self, name: &str, raw_arguments: &str) -> ToolOutput {
        match name {
            "list_directory" => self.list_directory(raw_arguments).await,
            "read_file" => self.read_file(raw_arguments).await,
            "write_file" => self.write_file(raw_arguments, false).await,
            "append_file" => self.write_file(raw_arguments, true).await,
            other => ToolOutput::err(format!("unknown tool: {}", other)),
        }
    }

    /// Resolve a model-supplied path against the root without touching the
    /// filesystem. Purely lexical so that not-yet-existing targets still
    /// get checked.
    fn resolve(&self, raw: &str) -> crate::error::Result<PathBuf> {
        let requested = Path::new(raw.trim());
        let violation = || ForemanError::SandboxViolation {
            path: requested.to_path_buf(),
        };
        let mut resolved = self.root.clone();
        let mut depth = 0usize;

        let components: Vec<Component> = if requested.is_absolute() {
            // Absolute paths are allowed only when they already sit under
            // the root
            requested
                .strip_prefix(&self.root)
                .map_err(|_| violation())?
                .components()
                .collect()
        } else {
            requested.components().collect()
        };

        for component in components {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(violation());
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return Err(violation()),
            }
        }

        // The lexical pass cannot see symlinks. Canonicalize the deepest
        // existing ancestor and re-check it against the root so a link
        // inside the tree that points outside it is still rejected.
        let mut ancestor = resolved.as_path();
        let real = loop {
            match ancestor.canonicalize() {
                Ok(real) => break real,
                Err(_) => match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => return Err(violation()),
                },
            }
        };
        if !real.starts_with(&self.root) {
            return Err(violation());
        }

        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    async fn list_directory(&self, raw_arguments: &str) -> ToolOutput {
        let args: PathArgs = match parse_args(raw_arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutput::err(e),
        };
        let target = match self.resolve(args.path.as_deref().unwrap_or(".")) {
            Ok(path) => path,
            Err(e) => return sandbox_rejection(e),
        };

        let mut reader = match tokio::fs::read_dir(&target).await {
            Ok(reader) => reader,
            Err(e) => return ToolOutput::err(format!("cannot list directory: {}", e)),
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    match entry.file_type().await {
                        Ok(kind) if kind.is_dir() => dirs.push(name),
                        Ok(_) => files.push(name),
                        Err(_) => files.push(name),
                    }
                }
                Ok(None) => break,
                Err(e) => return ToolOutput::err(format!("cannot list directory: {}", e)),
            }
        }

        dirs.sort_by_key(|n| n.to_lowercase());
        files.sort_by_key(|n| n.to_lowercase());
        let dir_total = dirs.len();
        let file_total = files.len();
        dirs.truncate(MAX_LISTED_DIRS);
        files.truncate(MAX_LISTED_FILES);

        let mut out = format!("Contents of {}:\n", self.relative(&target));
        for name in &dirs {
            out.push_str(&format!("  {}/\n", name));
        }
        for name in &files {
            out.push_str(&format!("  {}\n", name));
        }
        if dir_total > MAX_LISTED_DIRS || file_total > MAX_LISTED_FILES {
            out.push_str(&format!(
                "  ... truncated ({} directories, {} files total)\n",
                dir_total, file_total
            ));
        }
        if dir_total == 0 && file_total == 0 {
            out.push_str("  (empty)\n");
        }
        ToolOutput::ok(out)
    }

    async fn read_file(&self, raw_arguments: &str) -> ToolOutput {
        let args: PathArgs = match parse_args(raw_arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutput::err(e),
        };
        let Some(raw_path) = args.path else {
            return ToolOutput::err("read_file requires a 'path' argument".to_string());
        };
        let target = match self.resolve(&raw_path) {
            Ok(path) => path,
            Err(e) => return sandbox_rejection(e),
        };

        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                return ToolOutput::err(format!(
                    "'{}' is a directory, not a file",
                    self.relative(&target)
                ))
            }
            Ok(meta) if meta.len() > MAX_READ_BYTES => {
                return ToolOutput::err(format!(
                    "file is {} bytes, larger than the {} byte limit",
                    meta.len(),
                    MAX_READ_BYTES
                ))
            }
            Ok(_) => {}
            Err(e) => return ToolOutput::err(format!("cannot access file: {}", e)),
        }

        let content = match tokio::fs::read_to_string(&target).await {
            Ok(content) => content,
            Err(e) => return ToolOutput::err(format!("cannot read file: {}", e)),
        };
        // A caller-supplied cap truncates rather than rejecting
        let content = match args.max_bytes {
            Some(cap) if content.len() as u64 > cap => {
                let mut end = cap as usize;
                while end > 0 && !content.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}\n... (truncated)", &content[..end])
            }
            _ => content,
        };

        ToolOutput::ok(format!(
            "```{}\n{}\n```",
            self.relative(&target),
            content.trim_end_matches('\n')
        ))
    }

    async fn write_file(&self, raw_arguments: &str, append: bool) -> ToolOutput {
        let args: WriteArgs = match parse_args(raw_arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutput::err(e),
        };
        if !self.allow_writes {
            return ToolOutput::err(
                "file writes are disabled in this session".to_string(),
            );
        }
        let target = match self.resolve(&args.path) {
            Ok(path) => path,
            Err(e) => return sandbox_rejection(e),
        };

        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(format!("cannot create parent directory: {}", e));
            }
        }

        let result = if append {
            let mut existing = match tokio::fs::read_to_string(&target).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return ToolOutput::err(format!("cannot read file: {}", e)),
            };
            existing.push_str(&args.content);
            tokio::fs::write(&target, existing).await
        } else {
            tokio::fs::write(&target, &args.content).await
        };

        match result {
            Ok(()) => ToolOutput::ok(format!(
                "{} {} ({} bytes)",
                if append { "Appended to" } else { "Wrote" },
                self.relative(&target),
                args.content.len()
            )),
            Err(e) => ToolOutput::err(format!("cannot write file: {}", e)),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, String> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|e| format!("invalid tool arguments: {}", e))
}

fn sandbox_rejection(error: ForemanError) -> ToolOutput {
    warn!(%error, "rejected tool path");
    ToolOutput::err(error.to_string())
}
