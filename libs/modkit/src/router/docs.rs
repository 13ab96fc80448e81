use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{MountedRoute, RouterIntegration};

/// Operator-facing summary of one mounted module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDocumentation {
    pub module_id: String,
    pub module_name: String,
    pub prefix: String,
    pub mounted_at: DateTime<Utc>,
    pub disabled: bool,
    pub routes: Vec<MountedRoute>,
}

impl RouterIntegration {
    /// One entry per mounted module, ordered by module id.
    pub fn documentation(&self) -> Vec<RouteDocumentation> {
        self.mounts
            .read()
            .values()
            .map(|r| RouteDocumentation {
                module_id: r.module_id.clone(),
                module_name: r.module_name.clone(),
                prefix: r.prefix.clone(),
                mounted_at: r.mounted_at,
                disabled: r.disabled,
                routes: r.routes.clone(),
            })
            .collect()
    }

    pub fn documentation_markdown(&self) -> String {
        let docs = self.documentation();
        let mut out = String::from("# Module routes\n\n");
        if docs.is_empty() {
            out.push_str("_No modules are mounted._\n");
        }
        for doc in &docs {
            let _ = writeln!(out, "## {} (`{}`)\n", doc.module_name, doc.module_id);
            let _ = writeln!(out, "- Prefix: `{}`", doc.prefix);
            let _ = writeln!(out, "- Mounted: {}", doc.mounted_at.to_rfc3339());
            if doc.disabled {
                out.push_str("- Status: disabled\n");
            }
            out.push('\n');
            if doc.routes.is_empty() {
                out.push_str("_No routes declared._\n\n");
                continue;
            }
            out.push_str("| Method | Path | Full path |\n|---|---|---|\n");
            for r in &doc.routes {
                let _ = writeln!(out, "| {} | `{}` | `{}` |", r.method, r.path, r.full_path);
            }
            out.push('\n');
        }
        out.push_str(
            "> Routes of unregistered modules remain installed on the HTTP surface until \
             the process restarts",
        );
        if self.config.enforce_module_state {
            out.push_str("; they answer `503 Service Unavailable`.\n");
        } else {
            out.push_str(".\n");
        }
        out
    }
}
