//! Rendering of the periodic Nomad batch job that keeps a service group at capacity.

use crate::models::{InstanceTemplate, ServiceGroup};
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use handlebars::{Handlebars, handlebars_helper};
use serde::Serialize;
use std::collections::BTreeMap;

const JOB_TEMPLATE_NAME: &str = "job";

const JOB_TEMPLATE: &str = r#"
job "{{hcl_quote job_name}}" {
  type = "batch"
  periodic {
    cron = "*/2 * * * * *"
    prohibit_overlap = true
  }
  datacenters = ["{{hcl_quote datacenter}}"]
  group "scale" {
    constraint {
      distinct_hosts = true
    }
    constraint {
      operator = "="
      attribute = "${meta.role}"
      value = "automater"
    }
    task "healthy" {
      driver = "exec"
      artifact {
        source = "https://github.com/joyent/tsg-cli/releases/download/v{{tsg_cli_version}}/tsg-cli_{{tsg_cli_version}}_linux_amd64.tar.gz"
      }
      config {
        command = "tsg-cli"
        args = [
          "scale",
          "--count", "{{desired_count}}",
          "--pkg-id", "{{hcl_quote package_id}}",
          "--img-id", "{{hcl_quote image_id}}",
          "--tsg-name", "{{hcl_quote service_group_name}}",
          "--template-id", "{{template_id}}",
{{#if user_data}}
          "--userdata", "{{base64_encode user_data}}",
{{/if}}
{{#each networks}}
          "--networks", "{{hcl_quote this}}",
{{/each}}
{{#each tags}}
          "--tag", "{{hcl_quote @key}}={{hcl_quote this}}",
{{/each}}
{{#each metadata}}
          "--metadata", "{{base64_pair @key this}}",
{{/each}}
          "-A", "{{hcl_quote triton_account}}",
          "-K", "{{hcl_quote triton_key_id}}",
          "-U", "{{hcl_quote triton_url}}",
{{#if triton_key_material}}
          "--key-material", "{{base64_encode triton_key_material}}",
{{/if}}
        ]
      }
    }
  }
}
"#;

/// Inputs substituted into the job template.
///
/// Only ever lives for one render-and-submit call.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorJob {
    pub datacenter: String,
    pub job_name: String,
    pub desired_count: u32,
    pub package_id: String,
    pub image_id: String,
    pub service_group_name: String,
    pub template_id: String,
    pub user_data: Option<String>,
    pub firewall_enabled: bool,
    pub networks: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
    pub triton_account: String,
    pub triton_url: String,
    pub triton_key_id: String,
    pub triton_key_material: String,
    pub tsg_cli_version: String,
}

impl std::fmt::Debug for OrchestratorJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorJob")
            .field("datacenter", &self.datacenter)
            .field("job_name", &self.job_name)
            .field("desired_count", &self.desired_count)
            .field("package_id", &self.package_id)
            .field("image_id", &self.image_id)
            .field("service_group_name", &self.service_group_name)
            .field("template_id", &self.template_id)
            .field("networks", &self.networks)
            .field("triton_account", &self.triton_account)
            .field("triton_key_id", &self.triton_key_id)
            .finish_non_exhaustive()
    }
}

impl OrchestratorJob {
    /// Copy the machine shape and desired capacity; account fields are filled in later.
    pub fn from_template(template: &InstanceTemplate, group: &ServiceGroup) -> Self {
        Self {
            desired_count: group.capacity,
            package_id: template.package.clone(),
            image_id: template.image_id.clone(),
            service_group_name: group.group_name.clone(),
            firewall_enabled: template.firewall_enabled,
            template_id: template.template_id.to_string(),
            user_data: template.user_data.clone().filter(|s| !s.is_empty()),
            networks: template.networks.clone(),
            tags: template.tags.clone(),
            metadata: template.metadata.clone(),
            ..Self::default()
        }
    }
}

pub fn base64_encode(s: &str) -> String {
    BASE64.encode(s.as_bytes())
}

/// Escape a value for use inside a double-quoted HCL string.
pub fn hcl_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // `${` and `%{` start interpolation; doubling the sigil makes it literal.
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

handlebars_helper!(base64_encode_helper: |s: str| base64_encode(s));
handlebars_helper!(base64_pair_helper: |k: str, v: str| base64_encode(&format!("{k}={v}")));
handlebars_helper!(hcl_quote_helper: |s: str| hcl_quote(s));

pub struct JobRenderer {
    registry: Handlebars<'static>,
}

impl JobRenderer {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        // HCL is not HTML; escaping is done per value by `hcl_quote`.
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("base64_encode", Box::new(base64_encode_helper));
        registry.register_helper("base64_pair", Box::new(base64_pair_helper));
        registry.register_helper("hcl_quote", Box::new(hcl_quote_helper));
        registry
            .register_template_string(JOB_TEMPLATE_NAME, JOB_TEMPLATE)
            .map_err(|e| Error::Template(format!("parse job template: {e}")))?;
        Ok(Self { registry })
    }

    #[tracing::instrument(level = "debug", skip(self), fields(job_name = %job.job_name))]
    pub fn render(&self, job: &OrchestratorJob) -> Result<String> {
        self.registry
            .render(JOB_TEMPLATE_NAME, job)
            .map_err(|e| Error::Template(format!("render job template: {e}")))
    }
}
