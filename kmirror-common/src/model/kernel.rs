// kmirror-common/src/model/kernel.rs
use serde::{Deserialize, Serialize};

/// The inputs needed to build an artifact for one kernel package: the values
/// mocked as `uname -r`, `uname -v` and `uname -m` inside the build
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KernelPackage {
    pub name: String,
    #[serde(default)]
    pub operating_system: String,
    pub kernel_release: String,
    pub kernel_version: String,
    #[serde(default = "default_machine")]
    pub kernel_machine: String,
}

fn default_machine() -> String {
    "x86_64".to_string()
}

impl KernelPackage {
    /// The numeric build counter at the start of the kernel version, e.g.
    /// `151` for `#151-Ubuntu SMP Fri Jun 18 ...`.
    pub fn build_number(&self) -> Option<&str> {
        let rest = self.kernel_version.trim_start().strip_prefix('#')?;
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if end == 0 {
            None
        } else {
            Some(&rest[..end])
        }
    }

    /// Artifact stem without extension: `{prefix}_{os}_{release}_{build}`.
    pub fn artifact_stem(&self, prefix: &str) -> String {
        match self.build_number() {
            Some(build) => format!(
                "{}_{}_{}_{}",
                prefix, self.operating_system, self.kernel_release, build
            ),
            None => format!("{}_{}_{}", prefix, self.operating_system, self.kernel_release),
        }
    }

    pub fn artifact_name(&self, prefix: &str) -> String {
        format!("{}.o", self.artifact_stem(prefix))
    }
}

/// A driver version artifacts are built against. `label` is the human facing
/// release it came from (e.g. `0.29.1`), `version` the driver version key the
/// artifacts are published under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DriverTarget {
    #[serde(default)]
    pub label: Option<String>,
    pub version: String,
}

impl DriverTarget {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            label: None,
            version: version.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(os: &str, release: &str, version: &str) -> KernelPackage {
        KernelPackage {
            name: format!("linux-{release}"),
            operating_system: os.to_string(),
            kernel_release: release.to_string(),
            kernel_version: version.to_string(),
            kernel_machine: "x86_64".to_string(),
        }
    }

    #[test]
    fn artifact_name_uses_build_counter() {
        let ubuntu = package(
            "ubuntu",
            "4.15.0-147-generic",
            "#151-Ubuntu SMP Fri Jun 18 19:21:19 UTC 2021",
        );
        assert_eq!(
            ubuntu.artifact_name("falco"),
            "falco_ubuntu_4.15.0-147-generic_151.o"
        );

        let amzn = package(
            "amazonlinux2",
            "4.14.143-118.123.amzn2.x86_64",
            "#1 SMP Thu Sep 12 16:54:23 UTC 2019",
        );
        assert_eq!(
            amzn.artifact_stem("falco"),
            "falco_amazonlinux2_4.14.143-118.123.amzn2.x86_64_1"
        );
    }

    #[test]
    fn missing_build_counter_is_left_out() {
        let odd = package("cos", "5.4.0", "SMP PREEMPT");
        assert_eq!(odd.build_number(), None);
        assert_eq!(odd.artifact_name("probe"), "probe_cos_5.4.0.o");
    }

    #[test]
    fn driver_target_display_prefers_label() {
        let target = DriverTarget::new("17f5df52a7d9ed6bb12d3b1768460def8439936d");
        assert_eq!(target.display_name(), target.version);
        assert_eq!(target.with_label("0.29.1").display_name(), "0.29.1");
    }
}
