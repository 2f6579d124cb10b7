//! Discovery of repository guideline files (`CLAUDE.md`, cursor rules,
//! `.ai-context/`) that get injected into agent prompts.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetKind {
    CursorRules,
    CursorRule,
    ClaudeMd,
    AiContext,
}

/// One guideline file and its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnippet {
    /// Display name, e.g. `api/.cursor/rules/style.mdc`.
    pub name: String,
    pub kind: SnippetKind,
    pub path: PathBuf,
    pub content: String,
}

impl ContextSnippet {
    /// Scripts, skills and workflows are presented apart from plain rules.
    pub fn is_skill(&self) -> bool {
        let name = self.name.to_lowercase();
        ["script", "skill", "workflow", "open-pr", "pr.md"]
            .iter()
            .any(|k| name.contains(k))
    }
}

/// Find guideline files in each repository (or in the workspace root when
/// `repos` is empty). Unreadable or empty files are skipped.
pub fn scan_repos(workspace: &Path, repos: &[String]) -> Vec<ContextSnippet> {
    let dirs: Vec<PathBuf> = if repos.is_empty() {
        vec![workspace.to_path_buf()]
    } else {
        repos.iter().map(|r| workspace.join(r)).collect()
    };

    let mut found = Vec::new();
    for repo_dir in dirs.iter().filter(|d| d.is_dir()) {
        let repo_name = repo_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let named = |rel: &Path| format!("{repo_name}/{}", rel.display());

        let cursorrules = repo_dir.join(".cursorrules");
        if cursorrules.is_file() {
            found.push((SnippetKind::CursorRules, named(Path::new(".cursorrules")), cursorrules));
        }

        let rules_dir = repo_dir.join(".cursor").join("rules");
        if rules_dir.is_dir() {
            let mut rules: Vec<PathBuf> = std::fs::read_dir(&rules_dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.path())
                        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "mdc"))
                        .collect()
                })
                .unwrap_or_default();
            rules.sort();
            for rule in rules {
                let rel = rule.strip_prefix(repo_dir).unwrap_or(&rule).to_path_buf();
                found.push((SnippetKind::CursorRule, named(&rel), rule));
            }
        }

        let claude_md = repo_dir.join("CLAUDE.md");
        if claude_md.is_file() {
            found.push((SnippetKind::ClaudeMd, named(Path::new("CLAUDE.md")), claude_md));
        }

        let ai_dir = repo_dir.join(".ai-context");
        if ai_dir.is_dir() {
            for entry in WalkDir::new(&ai_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
            {
                let rel = entry.path().strip_prefix(repo_dir).unwrap_or(entry.path()).to_path_buf();
                found.push((SnippetKind::AiContext, named(&rel), entry.into_path()));
            }
        }
    }

    found
        .into_iter()
        .filter_map(|(kind, name, path)| load_snippet(kind, name, path))
        .collect()
}

/// Snippets for explicitly configured files; missing files are skipped.
pub fn from_paths(paths: &[PathBuf]) -> Vec<ContextSnippet> {
    paths
        .iter()
        .filter(|p| {
            let ok = p.is_file();
            if !ok {
                warn!(path = %p.display(), "agent context file not found, skipping");
            }
            ok
        })
        .filter_map(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string());
            load_snippet(SnippetKind::AiContext, name, p.clone())
        })
        .collect()
}

fn load_snippet(kind: SnippetKind, name: String, path: PathBuf) -> Option<ContextSnippet> {
    let raw = match std::fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!(path = %path.display(), "skipping unreadable context file: {e}");
            return None;
        }
    };
    let mut content = raw.trim();
    if kind == SnippetKind::CursorRule {
        content = strip_front_matter(content);
    }
    if content.is_empty() {
        return None;
    }
    Some(ContextSnippet {
        name,
        kind,
        path,
        content: content.to_string(),
    })
}

/// Drop a leading `---` ... `---` YAML block.
fn strip_front_matter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---") else {
        return content;
    };
    match rest.split_once("---") {
        Some((_, body)) => body.trim(),
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_matter_is_stripped() {
        let text = "---\ndescription: x\nglobs: *.rs\n---\nUse anyhow.";
        assert_eq!(strip_front_matter(text), "Use anyhow.");
    }

    #[test]
    fn unterminated_front_matter_is_kept() {
        assert_eq!(strip_front_matter("---\nno end"), "---\nno end");
    }

    #[test]
    fn skill_detection_by_name() {
        let s = |name: &str| ContextSnippet {
            name: name.into(),
            kind: SnippetKind::AiContext,
            path: PathBuf::new(),
            content: "x".into(),
        };
        assert!(s("api/.ai-context/skills/commit.md").is_skill());
        assert!(s("api/.ai-context/open-pr.md").is_skill());
        assert!(!s("api/CLAUDE.md").is_skill());
    }
}
