//! `.gitolite.rc` rendering.
//!
//! The rc file is Perl source evaluated by gitolite: a `%RC` hash, optional
//! top-level variables, and the mandatory trailing `1;`.
use std::fmt::Write as _;

use crate::config::gitolite::GitoliteParams;

/// Quote `value` as a single-quoted Perl string.
fn perl_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Render the rc file for `params`.
#[must_use]
pub fn render(params: &GitoliteParams) -> String {
    let mut out = String::new();
    out.push_str("# configuration variables for gitolite\n");
    out.push_str("# managed by converge; local changes will be overwritten\n\n");
    out.push_str("%RC = (\n");

    let mut entry = |key: &str, value: &str| {
        let _ = writeln!(out, "    {key:<32}=>  {value},");
    };
    entry("UMASK", &params.umask);
    entry("GIT_CONFIG_KEYS", &perl_quote(&params.git_config_keys));
    entry("LOG_EXTRA", if params.log_extra { "1" } else { "0" });
    entry("LOG_DEST", &perl_quote(&params.log_dest.join(",")));
    if let Some(info) = params.site_info() {
        entry("SITE_INFO", &perl_quote(info));
    }
    if let Some(host) = params.hostname.as_deref().filter(|h| !h.is_empty()) {
        entry("HOSTNAME", &perl_quote(host));
    }
    if let Some(code) = params.local_code() {
        entry("LOCAL_CODE", &perl_quote(code));
    }
    for (key, value) in &params.additional_gitoliterc {
        entry(key, value);
    }

    out.push_str("\n    ROLES => {\n");
    for role in &params.roles {
        let _ = writeln!(out, "        {role:<28}=>  1,");
    }
    out.push_str("    },\n");

    out.push_str("\n    ENABLE => [\n");
    for command in &params.commands {
        let _ = writeln!(out, "        {},", perl_quote(command));
    }
    out.push_str("    ],\n");
    out.push_str(");\n");

    if !params.additional_gitoliterc_notrc.is_empty() {
        out.push('\n');
        for (key, value) in &params.additional_gitoliterc_notrc {
            let _ = writeln!(out, "${key} = {value};");
        }
    }

    out.push_str("\n# per perl rules, this should be the last line in such a file:\n1;\n");
    out
}
