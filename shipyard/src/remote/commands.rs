//! Shell commands run on deployment hosts and parsers for their output.
//!
//! Every interpolated value is validated by the registry and quoted here, so
//! project data never reaches the remote shell unescaped.

use std::collections::BTreeMap;

use crate::models::job::CommitInfo;

/// Characters never accepted in remote paths
const PATH_FORBIDDEN: &[char] = &[
    ';', '&', '|', '>', '<', '`', '$', '(', ')', '\'', '"', '\\', '\n', '\r', '\0',
];

/// Additional characters never accepted in branch names
const BRANCH_FORBIDDEN: &[char] = &[' ', '\t', '*', '?', '[', ']', '{', '}', '~', '^', ':'];

/// File written by the pre-pull backup
pub const LAST_DEPLOY_COMMIT_FILE: &str = ".last_deploy_commit";

/// Environment files read for the environment snapshot, in priority order
pub const ENV_FILES: [&str; 2] = [".env.production", ".env"];

/// Remote path free of shell metacharacters
pub fn is_safe_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains(PATH_FORBIDDEN)
}

/// Git branch name that is safe to interpolate
pub fn is_valid_branch(branch: &str) -> bool {
    is_safe_path(branch)
        && !branch.contains(BRANCH_FORBIDDEN)
        && !branch.starts_with('-')
        && !branch.starts_with('/')
        && !branch.ends_with('/')
        && !branch.ends_with(".lock")
        && !branch.contains("..")
        && !branch.contains("//")
}

/// Single-quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn in_dir(path: &str, command: &str) -> String {
    format!("cd {} && {}", shell_quote(path), command)
}

fn compose(compose_file: &str, args: &str) -> String {
    format!("docker compose -f {} {}", shell_quote(compose_file), args)
}

/// Bring the checkout to the tip of `branch`.
///
/// Falls back to a hard reset when the fast-forward is refused.
pub fn git_pull(path: &str, branch: &str) -> String {
    let b = shell_quote(branch);
    in_dir(
        path,
        &format!(
            "git fetch origin {b} && git checkout {b} && (git pull --ff-only origin {b} || git reset --hard origin/{b})",
            b = b
        ),
    )
}

/// `<short hash>|<subject>` of HEAD
pub fn current_commit(path: &str) -> String {
    in_dir(
        path,
        "git log -1 --pretty=format:'%h|%s' 2>/dev/null || echo 'unknown|'",
    )
}

/// Record HEAD so a rollback can return to it
pub fn backup(path: &str) -> String {
    in_dir(
        path,
        &format!(
            "git rev-parse HEAD > {} && date -u +%Y-%m-%dT%H:%M:%SZ > .backup_timestamp",
            LAST_DEPLOY_COMMIT_FILE
        ),
    )
}

pub fn compose_down(path: &str, compose_file: &str) -> String {
    in_dir(path, &compose(compose_file, "down --remove-orphans"))
}

pub fn compose_up(path: &str, compose_file: &str) -> String {
    in_dir(path, &compose(compose_file, "up -d --build"))
}

pub fn compose_ps(path: &str, compose_file: &str) -> String {
    in_dir(path, &compose(compose_file, "ps --format json"))
}

pub fn compose_logs(path: &str, compose_file: &str, lines: u32) -> String {
    in_dir(
        path,
        &compose(compose_file, &format!("logs --no-color --tail {}", lines)),
    )
}

/// HTTP status code of `url` as seen from the host, `000` when unreachable
pub fn http_probe(url: &str, timeout_secs: u64) -> String {
    format!(
        "curl -s -o /dev/null -w '%{{http_code}}' --max-time {} {} || true",
        timeout_secs.max(1),
        shell_quote(url)
    )
}

/// Run a health command inside the project directory
pub fn health_command(path: &str, command: &str) -> String {
    in_dir(path, command)
}

/// Print the first environment file that exists
pub fn read_env(path: &str) -> String {
    let files = ENV_FILES
        .iter()
        .map(|f| format!("(test -f {f} && cat {f})", f = f))
        .collect::<Vec<_>>()
        .join(" || ");
    in_dir(path, &format!("{} || true", files))
}

/// Check out the commit recorded by the last backup, or the parent of HEAD
pub fn rollback(path: &str) -> String {
    in_dir(
        path,
        &format!(
            "if [ -s {f} ]; then git checkout \"$(cat {f})\"; else git checkout HEAD~1; fi",
            f = LAST_DEPLOY_COMMIT_FILE
        ),
    )
}

/// Hex SHA-256 of a remote file, empty output when the file is missing
pub fn remote_sha256(remote_path: &str) -> String {
    let p = shell_quote(remote_path);
    format!(
        "if [ -f {p} ]; then (sha256sum {p} 2>/dev/null || shasum -a 256 {p}) | cut -d' ' -f1; fi",
        p = p
    )
}

/// Create the parent directory of a remote file
pub fn ensure_parent_dir(remote_path: &str) -> Option<String> {
    let (parent, _) = remote_path.rsplit_once('/')?;
    if parent.is_empty() {
        return None;
    }
    Some(format!("mkdir -p {}", shell_quote(parent)))
}

pub fn connection_test() -> &'static str {
    "echo 'connection test'"
}

pub fn git_status(path: &str) -> String {
    in_dir(path, "git status --porcelain 2>&1")
}

pub fn file_exists(path: &str, file: &str) -> String {
    in_dir(path, &format!("test -f {}", shell_quote(file)))
}

pub fn docker_info() -> &'static str {
    "docker info > /dev/null 2>&1"
}

pub fn compose_version() -> &'static str {
    "docker compose version > /dev/null 2>&1"
}

/// Used percentage of the filesystem holding `path`, digits only
pub fn disk_usage(path: &str) -> String {
    format!(
        "df -P {} | tail -1 | awk '{{print $5}}' | tr -d '%'",
        shell_quote(path)
    )
}

/// Parse the output of [`current_commit`]
pub fn parse_commit(output: &str) -> Option<CommitInfo> {
    let line = output.lines().find(|l| !l.trim().is_empty())?.trim();
    let (hash, subject) = line.split_once('|').unwrap_or((line, ""));
    let hash = hash.trim();
    if hash.is_empty() || hash == "unknown" {
        return None;
    }
    Some(CommitInfo {
        hash: hash.to_string(),
        subject: subject.trim().to_string(),
    })
}

/// Summarize `compose ps` output as `running`, `stopped` or `unknown`
pub fn parse_container_status(output: &str) -> &'static str {
    let lowered = output.to_ascii_lowercase();
    if lowered.contains("running") {
        "running"
    } else if lowered.contains("exited") || lowered.contains("stopped") {
        "stopped"
    } else {
        "unknown"
    }
}

/// Parse `KEY=VALUE` lines, skipping comments and invalid names
pub fn parse_env_file(contents: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if !is_env_name(key) {
            continue;
        }
        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    vars
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Parse the output of [`http_probe`]
pub fn parse_http_code(output: &str) -> Option<u16> {
    output
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|code| *code != 0)
}

/// Healthy when the status code is 2xx or 3xx
pub fn is_healthy_http_code(code: u16) -> bool {
    (200..400).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_validation() {
        assert!(is_safe_path("/srv/api"));
        assert!(is_safe_path("/home/deploy/my app"));
        assert!(!is_safe_path(""));
        assert!(!is_safe_path("/srv/api; rm -rf /"));
        assert!(!is_safe_path("/srv/$(whoami)"));
        assert!(!is_safe_path("/srv/`id`"));
    }

    #[test]
    fn test_branch_validation() {
        assert!(is_valid_branch("main"));
        assert!(is_valid_branch("feature/login-v2"));
        assert!(is_valid_branch("release-1.4"));
        assert!(!is_valid_branch("main && reboot"));
        assert!(!is_valid_branch("feat*"));
        assert!(!is_valid_branch("--upload-pack=evil"));
        assert!(!is_valid_branch("a..b"));
        assert!(!is_valid_branch("x{y}"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/srv/api"), "'/srv/api'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_git_pull_command() {
        let cmd = git_pull("/srv/api", "main");
        assert!(cmd.starts_with("cd '/srv/api' && git fetch origin 'main'"));
        assert!(cmd.contains("git reset --hard origin/'main'"));
    }

    #[test]
    fn test_parse_commit() {
        let commit = parse_commit("a1b2c3d|Fix login redirect\n").unwrap();
        assert_eq!(commit.hash, "a1b2c3d");
        assert_eq!(commit.subject, "Fix login redirect");

        assert!(parse_commit("unknown|").is_none());
        assert!(parse_commit("").is_none());
    }

    #[test]
    fn test_parse_container_status() {
        assert_eq!(
            parse_container_status(r#"{"Name":"api-web-1","State":"running"}"#),
            "running"
        );
        assert_eq!(
            parse_container_status(r#"{"Name":"api-web-1","State":"exited"}"#),
            "stopped"
        );
        assert_eq!(parse_container_status(""), "unknown");
    }

    #[test]
    fn test_parse_env_file() {
        let vars = parse_env_file(
            "# comment\nDATABASE_URL=\"postgres://db/app\"\nexport PORT=8080\n\n1BAD=x\nNOEQUALS\nMODE='prod'\n",
        );
        assert_eq!(vars.get("DATABASE_URL").unwrap(), "postgres://db/app");
        assert_eq!(vars.get("PORT").unwrap(), "8080");
        assert_eq!(vars.get("MODE").unwrap(), "prod");
        assert_eq!(vars.len(), 3);
    }

    #[test]
    fn test_http_codes() {
        assert_eq!(parse_http_code("200"), Some(200));
        assert_eq!(parse_http_code("000"), None);
        assert_eq!(parse_http_code("garbage"), None);
        assert!(is_healthy_http_code(302));
        assert!(!is_healthy_http_code(503));
    }

    #[test]
    fn test_ensure_parent_dir() {
        assert_eq!(
            ensure_parent_dir("/srv/api/config/app.env").as_deref(),
            Some("mkdir -p '/srv/api/config'")
        );
        assert_eq!(ensure_parent_dir("app.env"), None);
    }
}
