//! Sidecar metadata resolution.
//!
//! Turns the free-form `_meta.sidecarConfig` of a catalog entry into a
//! normalized [`SidecarSpec`]. Accepted shapes:
//!
//! - `command` holding a bare executable, a docker subcommand (`run`) or a
//!   full command line, plus an optional `args` list;
//! - the legacy `dockerImage` + `dockerCommand` pair;
//! - `env` as a list of `{name, value}` objects.
//!
//! `-e KEY=VALUE` pairs are lifted into the env list, `{{name}}` placeholders
//! are filled from the adapter's environment variables and socket
//! multiplexer wrappers are stripped.

use portico_core::{EnvVar, McpServer, RuntimeFamily, SidecarSpec};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Package runner used when an entry carries no launch metadata.
pub fn default_launch_spec() -> SidecarSpec {
    SidecarSpec {
        runtime: RuntimeFamily::Npx,
        command: "npx".to_string(),
        args: vec![
            "-y".to_string(),
            "@modelcontextprotocol/server-everything".to_string(),
        ],
        env: Vec::new(),
        port: 0,
    }
}

/// Resolves the launch specification of `entry`, or `None` when the entry
/// carries no usable sidecar metadata.
pub fn resolve_sidecar_spec(
    entry: &McpServer,
    adapter_env: &HashMap<String, String>,
) -> Option<SidecarSpec> {
    let raw = entry.meta.get("sidecarConfig")?.as_object()?;

    let runtime = match raw.get("commandType").and_then(Value::as_str).map(parse_runtime) {
        Some(Some(runtime)) => runtime,
        other => {
            warn!(
                entry = %entry.id,
                command_type = ?raw.get("commandType"),
                unknown = other.is_some(),
                "Ignoring sidecar metadata without a supported commandType"
            );
            return None;
        }
    };

    let mut argv = match command_tokens(runtime, raw) {
        Ok(argv) => argv,
        Err(e) => {
            warn!(entry = %entry.id, error = %e, "Unparseable sidecar command");
            return None;
        }
    };
    argv.extend(string_list(raw.get("args")));
    if argv.is_empty() {
        return None;
    }

    argv = strip_multiplexer(argv);

    let mut env = env_list(raw.get("env"));
    let mut args = lift_env_flags(argv.split_off(1), &mut env);
    let command = argv.remove(0);

    if runtime == RuntimeFamily::Docker {
        if args.first().map(String::as_str) != Some("run") {
            args.insert(0, "run".to_string());
        }
        if docker_image_position(&args).is_none() {
            if let Some(image) = fallback_image(entry) {
                args.push(image);
            }
        }
    }

    for arg in &mut args {
        *arg = substitute_templates(arg, adapter_env);
    }
    for var in &mut env {
        var.value = substitute_templates(&var.value, adapter_env);
    }

    let spec = SidecarSpec {
        runtime,
        command,
        args,
        env,
        port: 0,
    };
    debug!(entry = %entry.id, command = %spec.command_line(), "Resolved sidecar launch spec");
    Some(spec)
}

fn parse_runtime(s: &str) -> Option<RuntimeFamily> {
    match s.trim().to_ascii_lowercase().as_str() {
        "docker" => Some(RuntimeFamily::Docker),
        "npx" | "node" => Some(RuntimeFamily::Npx),
        "uv" | "uvx" => Some(RuntimeFamily::Uv),
        "python" | "python3" => Some(RuntimeFamily::Python),
        _ => None,
    }
}

fn default_executable(runtime: RuntimeFamily) -> &'static str {
    match runtime {
        RuntimeFamily::Docker => "docker",
        RuntimeFamily::Npx => "npx",
        RuntimeFamily::Uv => "uvx",
        RuntimeFamily::Python => "python",
    }
}

/// Executable and leading arguments from `command`, `dockerImage` or the runtime default.
fn command_tokens(
    runtime: RuntimeFamily,
    raw: &Map<String, Value>,
) -> Result<Vec<String>, shell_words::ParseError> {
    let command = raw
        .get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if command.is_empty() {
        let image = raw.get("dockerImage").and_then(Value::as_str).unwrap_or_default();
        if runtime == RuntimeFamily::Docker && !image.is_empty() {
            let mut argv = vec![
                "docker".to_string(),
                "run".to_string(),
                "--rm".to_string(),
                "-i".to_string(),
                image.to_string(),
            ];
            if let Some(cmd) = raw.get("dockerCommand").and_then(Value::as_str) {
                argv.extend(shell_words::split(cmd)?);
            }
            return Ok(argv);
        }
        return Ok(vec![default_executable(runtime).to_string()]);
    }

    let tokens = shell_words::split(command)?;
    if runtime == RuntimeFamily::Docker && tokens.first().map(String::as_str) != Some("docker") {
        // `command: run` or `command: "run --rm image"`
        let mut argv = vec!["docker".to_string()];
        argv.extend(tokens);
        return Ok(argv);
    }
    Ok(tokens)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn env_list(value: Option<&Value>) -> Vec<EnvVar> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name")?.as_str()?;
                    let value = item.get("value")?.as_str()?;
                    Some(EnvVar::new(name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Moves `-e KEY=VALUE` / `--env KEY=VALUE` pairs from `args` into `env`.
fn lift_env_flags(args: Vec<String>, env: &mut Vec<EnvVar>) -> Vec<String> {
    let mut kept = Vec::with_capacity(args.len());
    let mut iter = args.into_iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "-e" || arg == "--env" {
            if let Some((key, value)) = iter.peek().and_then(|pair| pair.split_once('=')) {
                if !key.is_empty() {
                    env.push(EnvVar::new(key, value));
                    iter.next();
                    continue;
                }
            }
        }
        kept.push(arg);
    }
    kept
}

fn program_name(token: &str) -> &str {
    Path::new(token)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(token)
}

/// Replaces a socket multiplexer wrapper with the command it forks.
///
/// Handles `socat <address> EXEC:"cmd"` (or `SYSTEM:`) anywhere in the
/// argument list, including inside `sh -c` / `bash -c` scripts.
pub fn strip_multiplexer(argv: Vec<String>) -> Vec<String> {
    if argv.len() >= 3 && matches!(program_name(&argv[0]), "sh" | "bash") && argv[1] == "-c" {
        if let Ok(inner) = shell_words::split(&argv[2]) {
            let stripped = strip_multiplexer(inner.clone());
            if stripped != inner {
                return stripped;
            }
        }
        return argv;
    }

    let Some(socat_at) = argv.iter().position(|t| program_name(t) == "socat") else {
        return argv;
    };
    let wrapped = argv[socat_at + 1..].iter().find_map(|t| {
        t.strip_prefix("EXEC:")
            .or_else(|| t.strip_prefix("SYSTEM:"))
            .map(|rest| rest.split(',').next().unwrap_or(rest).trim_matches(['"', '\'']))
    });
    let Some(inner) = wrapped else {
        return argv;
    };
    match shell_words::split(inner) {
        Ok(tokens) if !tokens.is_empty() => {
            let mut out = argv[..socat_at].to_vec();
            out.extend(tokens);
            debug!(command = %out.join(" "), "Stripped multiplexer wrapper");
            out
        }
        _ => argv,
    }
}

/// Docker flags that consume the following argument.
const DOCKER_VALUE_FLAGS: &[&str] = &[
    "-e", "--env", "-p", "--publish", "-v", "--volume", "--name", "--network", "-w",
    "--workdir", "--entrypoint", "-u", "--user", "--env-file", "-l", "--label", "--mount",
];

/// Index of the image reference in `run ...` arguments.
fn docker_image_position(args: &[String]) -> Option<usize> {
    let mut i = usize::from(args.first().map(String::as_str) == Some("run"));
    while i < args.len() {
        let arg = &args[i];
        if DOCKER_VALUE_FLAGS.contains(&arg.as_str()) {
            i += 2;
            continue;
        }
        if !arg.starts_with('-') {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn fallback_image(entry: &McpServer) -> Option<String> {
    entry
        .image
        .clone()
        .filter(|i| !i.is_empty())
        .or_else(|| {
            entry
                .packages
                .first()
                .map(|p| p.identifier.clone())
                .filter(|i| !i.is_empty())
        })
}

/// Fills `{{name}}` placeholders. A placeholder matches a variable by exact
/// name or by its dotted lowercase form (`API_URL` answers `{{api.url}}`).
/// Unknown placeholders are left untouched.
pub fn substitute_templates(input: &str, env: &HashMap<String, String>) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }
    let Ok(pattern) = Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}") else {
        return input.to_string();
    };
    pattern
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            env.get(key)
                .or_else(|| {
                    env.iter()
                        .find(|(name, _)| name.to_ascii_lowercase().replace('_', ".") == key)
                        .map(|(_, value)| value)
                })
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_with(config: Value) -> McpServer {
        let mut entry = McpServer::new("entry", "entry");
        entry.meta.insert("sidecarConfig".into(), config);
        entry
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_no_metadata_resolves_to_none() {
        assert!(resolve_sidecar_spec(&McpServer::new("x", "x"), &no_env()).is_none());
        let entry = entry_with(json!({"commandType": "java", "command": "java -jar s.jar"}));
        assert!(resolve_sidecar_spec(&entry, &no_env()).is_none());
    }

    #[test]
    fn test_npx_command_and_args() {
        let entry = entry_with(json!({
            "commandType": "npx",
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-filesystem", "/data"],
            "env": [{"name": "LOG_LEVEL", "value": "debug"}, {"name": "broken"}]
        }));
        let spec = resolve_sidecar_spec(&entry, &no_env()).unwrap();
        assert_eq!(spec.runtime, RuntimeFamily::Npx);
        assert_eq!(spec.command, "npx");
        assert_eq!(spec.args, vec!["-y", "@modelcontextprotocol/server-filesystem", "/data"]);
        assert_eq!(spec.env, vec![EnvVar::new("LOG_LEVEL", "debug")]);
        assert_eq!(spec.port, 0);
    }

    #[test]
    fn test_docker_full_command_lifts_env_and_appends_image() {
        let mut entry = entry_with(json!({
            "commandType": "docker",
            "command": "docker run -i --rm -e UYUNI_SERVER={{uyuni.server}} -e UYUNI_SSL=false"
        }));
        entry.image = Some("ghcr.io/uyuni-project/mcp-server-uyuni:latest".into());
        let mut env = HashMap::new();
        env.insert("UYUNI_SERVER".to_string(), "uyuni.example:443".to_string());

        let spec = resolve_sidecar_spec(&entry, &env).unwrap();
        assert_eq!(spec.command, "docker");
        assert_eq!(
            spec.args,
            vec!["run", "-i", "--rm", "ghcr.io/uyuni-project/mcp-server-uyuni:latest"]
        );
        assert_eq!(
            spec.env,
            vec![
                EnvVar::new("UYUNI_SERVER", "uyuni.example:443"),
                EnvVar::new("UYUNI_SSL", "false"),
            ]
        );
    }

    #[test]
    fn test_docker_command_with_image_is_not_extended() {
        let mut entry = entry_with(json!({
            "commandType": "docker",
            "command": "run",
            "args": ["--rm", "-v", "/tmp:/data", "mcp/fetch", "--verbose"]
        }));
        entry.image = Some("other/image".into());
        let spec = resolve_sidecar_spec(&entry, &no_env()).unwrap();
        assert_eq!(spec.command, "docker");
        assert_eq!(spec.args, vec!["run", "--rm", "-v", "/tmp:/data", "mcp/fetch", "--verbose"]);
    }

    #[test]
    fn test_legacy_docker_image_pair() {
        let entry = entry_with(json!({
            "commandType": "docker",
            "dockerImage": "mcp/bugzilla:1.2",
            "dockerCommand": "--url https://bugzilla.example"
        }));
        let spec = resolve_sidecar_spec(&entry, &no_env()).unwrap();
        assert_eq!(
            spec.args,
            vec!["run", "--rm", "-i", "mcp/bugzilla:1.2", "--url", "https://bugzilla.example"]
        );
    }

    #[test]
    fn test_multiplexer_wrapper_is_stripped() {
        let entry = entry_with(json!({
            "commandType": "python",
            "command": r#"socat TCP-LISTEN:8000,reuseaddr,fork EXEC:"python -m mcp_server --stdio",stderr"#
        }));
        let spec = resolve_sidecar_spec(&entry, &no_env()).unwrap();
        assert_eq!(spec.command, "python");
        assert_eq!(spec.args, vec!["-m", "mcp_server", "--stdio"]);
    }

    #[test]
    fn test_multiplexer_inside_shell_script() {
        let argv: Vec<String> = vec![
            "sh".into(),
            "-c".into(),
            "socat TCP-LISTEN:9000,fork SYSTEM:'uvx mcp-server-time'".into(),
        ];
        assert_eq!(strip_multiplexer(argv), vec!["uvx", "mcp-server-time"]);

        let plain: Vec<String> = vec!["bash".into(), "-c".into(), "echo hi".into()];
        assert_eq!(strip_multiplexer(plain.clone()), plain);
    }

    #[test]
    fn test_multiplexer_inside_docker_run() {
        let argv: Vec<String> = shell_words::split(
            r#"docker run --rm img socat TCP-LISTEN:8000,fork EXEC:"node dist/index.js""#,
        )
        .unwrap();
        assert_eq!(
            strip_multiplexer(argv),
            vec!["docker", "run", "--rm", "img", "node", "dist/index.js"]
        );
    }

    #[test]
    fn test_templates() {
        let mut env = HashMap::new();
        env.insert("API_URL".to_string(), "https://api".to_string());
        env.insert("token".to_string(), "t0k".to_string());
        assert_eq!(
            substitute_templates("--url={{api.url}} --t {{ token }} {{missing}}", &env),
            "--url=https://api --t t0k {{missing}}"
        );
    }

    #[test]
    fn test_default_spec() {
        let spec = default_launch_spec();
        assert_eq!(spec.command_line(), "npx -y @modelcontextprotocol/server-everything");
        assert_eq!(spec.port, 0);
    }
}
