//! 本地进程后端
//!
//! 绑定根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 逃逸）；
//! 命令通过 sh -c 执行，带超时，任务被取消（future 被 drop）时子进程随之结束。

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use glob::{MatchOptions, Pattern};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::env::{
    replace_unique, CommandOutput, EditOutcome, Encoding, EnvError, Environment, GlobOptions,
    ListEntry, ReadOptions, VcsState,
};

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_READ_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_GLOB_RESULTS: usize = 5000;

/// 本地文件系统 + 子进程执行环境
#[derive(Debug, Clone)]
pub struct LocalEnvironment {
    root_dir: PathBuf,
    root_str: String,
    command_timeout_secs: u64,
    max_read_bytes: u64,
}

impl LocalEnvironment {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        let root_str = root_dir.to_string_lossy().to_string();
        Self {
            root_dir,
            root_str,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs.max(1);
        self
    }

    pub fn with_max_read_bytes(mut self, bytes: u64) -> Self {
        self.max_read_bytes = bytes;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// 把相对（或根内绝对）路径解析为根下的绝对路径；词法规范化后再对已存在路径做 symlink 校验
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EnvError> {
        let trimmed = path.trim();
        let rel = Path::new(trimmed.trim_start_matches("./"));
        let joined = if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.root_dir.join(rel)
        };

        let mut normalized = PathBuf::new();
        for comp in joined.components() {
            match comp {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(EnvError::PathEscape(path.to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }
        if !normalized.starts_with(&self.root_dir) {
            return Err(EnvError::PathEscape(path.to_string()));
        }
        if let Ok(canonical) = normalized.canonicalize() {
            if !canonical.starts_with(&self.root_dir) {
                return Err(EnvError::PathEscape(path.to_string()));
            }
        }
        Ok(normalized)
    }

    async fn git(&self, args: &str) -> Result<CommandOutput, EnvError> {
        self.execute_command(&format!("git {args}"), None).await
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

/// base 下的相对路径，统一用 / 分隔
fn relative_path(base: &Path, full: &Path) -> String {
    full.strip_prefix(base)
        .unwrap_or(full)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn root(&self) -> &str {
        &self.root_str
    }

    async fn execute_command(&self, cmd: &str, cwd: Option<&str>) -> Result<CommandOutput, EnvError> {
        let dir = match cwd {
            Some(c) if !c.trim().is_empty() => self.resolve(c)?,
            _ => self.root_dir.clone(),
        };
        tracing::debug!(command = %cmd, cwd = %dir.display(), "local execute");

        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", cmd]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", cmd]);
            c
        };
        command
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(
            Duration::from_secs(self.command_timeout_secs),
            command.output(),
        )
        .await
        .map_err(|_| EnvError::Timeout(self.command_timeout_secs))??;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn read_file(&self, path: &str, options: &ReadOptions) -> Result<String, EnvError> {
        let resolved = self.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| EnvError::NotFound(path.to_string()))?;
        if meta.is_dir() {
            return Err(EnvError::Io(format!("{path} is a directory")));
        }
        let max = options.max_size.unwrap_or(self.max_read_bytes);
        if meta.len() > max {
            return Err(EnvError::TooLarge {
                path: path.to_string(),
                size: meta.len(),
                max,
            });
        }

        let bytes = tokio::fs::read(&resolved).await?;
        if options.encoding == Encoding::Base64 {
            return Ok(STANDARD.encode(bytes));
        }
        let content = String::from_utf8_lossy(&bytes).to_string();
        if options.line_offset.is_none() && options.line_count.is_none() {
            return Ok(content);
        }
        let offset = options.line_offset.unwrap_or(0);
        let count = options.line_count.unwrap_or(usize::MAX);
        Ok(content
            .lines()
            .skip(offset)
            .take(count)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn write_file(&self, path: &str, content: &str, encoding: Encoding) -> Result<(), EnvError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = match encoding {
            Encoding::Utf8 => content.as_bytes().to_vec(),
            Encoding::Base64 => STANDARD
                .decode(content.trim())
                .map_err(|e| EnvError::Io(format!("invalid base64 content: {e}")))?,
        };
        tokio::fs::write(&resolved, bytes).await?;
        Ok(())
    }

    async fn edit_file(
        &self,
        path: &str,
        search: &str,
        replace: &str,
        encoding: Encoding,
    ) -> Result<EditOutcome, EnvError> {
        if encoding != Encoding::Utf8 {
            return Err(EnvError::UnsupportedEncoding("edit_file only supports utf8".into()));
        }
        let resolved = self.resolve(path)?;
        let original = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|_| EnvError::NotFound(path.to_string()))?;
        let updated = replace_unique(path, &original, search, replace)?;
        tokio::fs::write(&resolved, &updated).await?;
        Ok(EditOutcome {
            original_content: original,
            new_content: updated,
        })
    }

    async fn list(&self, path: &str, show_hidden: bool, details: bool) -> Result<Vec<ListEntry>, EnvError> {
        let base = if path.trim().is_empty() || path.trim() == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut dir = tokio::fs::read_dir(&base)
            .await
            .map_err(|_| EnvError::NotFound(path.to_string()))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !show_hidden && is_hidden(&name) {
                continue;
            }
            let meta = entry.metadata().await?;
            entries.push(ListEntry {
                name,
                is_dir: meta.is_dir(),
                size: details.then(|| meta.len()),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn glob(&self, pattern: &str, options: &GlobOptions) -> Result<Vec<String>, EnvError> {
        let compiled = Pattern::new(pattern).map_err(|e| EnvError::InvalidPattern(e.to_string()))?;
        // "**/x" 也应匹配根下的 "x"
        let shallow = pattern
            .strip_prefix("**/")
            .map(Pattern::new)
            .transpose()
            .map_err(|e| EnvError::InvalidPattern(e.to_string()))?;
        let match_opts = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let base = match options.cwd.as_deref() {
            Some(c) if !c.trim().is_empty() => self.resolve(c)?,
            _ => self.root_dir.clone(),
        };
        let limit = options.max_results.unwrap_or(DEFAULT_MAX_GLOB_RESULTS);
        let include_hidden = options.include_hidden;
        let files_only = options.files_only;
        let root = base;

        let mut matches = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in WalkDir::new(&root)
                .min_depth(1)
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0 || include_hidden || !is_hidden(&e.file_name().to_string_lossy())
                })
                .filter_map(|e| e.ok())
            {
                if files_only && entry.file_type().is_dir() {
                    continue;
                }
                let rel = relative_path(&root, entry.path());
                let hit = compiled.matches_with(&rel, match_opts)
                    || shallow
                        .as_ref()
                        .is_some_and(|p| p.matches_with(&rel, match_opts));
                if hit {
                    out.push(rel);
                }
            }
            out
        })
        .await
        .map_err(|e| EnvError::Io(format!("glob task failed: {e}")))?;

        matches.sort();
        matches.truncate(limit);
        Ok(matches)
    }

    async fn vcs_state(&self) -> Result<VcsState, EnvError> {
        let inside = self.git("rev-parse --is-inside-work-tree").await?;
        if !inside.success() || inside.stdout.trim() != "true" {
            return Ok(VcsState::default());
        }

        let head = self.git("rev-parse HEAD").await?;
        let branch = self.git("rev-parse --abbrev-ref HEAD").await?;
        let status = self.git("status --porcelain").await?;

        let mut state = VcsState {
            is_repo: true,
            commit_id: head.success().then(|| head.stdout.trim().to_string()),
            branch: branch.success().then(|| branch.stdout.trim().to_string()),
            ..VcsState::default()
        };
        for line in status.stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            let (code, file) = line.split_at(3);
            let mut flags = code.chars();
            let x = flags.next().unwrap_or(' ');
            let y = flags.next().unwrap_or(' ');
            let file = file.trim().to_string();
            if x == '?' {
                state.untracked.push(file);
                continue;
            }
            if x != ' ' {
                state.staged.push(file.clone());
            }
            if y != ' ' {
                state.modified.push(file);
            }
        }
        Ok(state)
    }
}
