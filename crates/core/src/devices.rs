use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MonitorConfig;
use crate::issue::{Issue, IssueKind, Observed};

const LSBLK_COLUMNS: &str = "NAME,SIZE,LABEL,FSTYPE,TYPE";
const UNLABELED: &str = "Unlabeled";
const UNKNOWN_SIZE: &str = "Unknown";

/// A removable partition that carries a filesystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDevice {
    pub device: String,
    pub name: String,
    pub size: String,
    pub label: String,
    pub fstype: String,
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<LsblkSize>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

// Older lsblk builds emit SIZE as a number under some locales.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LsblkSize {
    Text(String),
    Bytes(u64),
}

impl LsblkSize {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Bytes(bytes) => bytes.to_string(),
        }
    }
}

/// Keeps partitions of `disk`-type devices whose name starts with
/// `removable_prefix` and that report a filesystem type.
pub fn parse_block_devices(
    payload: &str,
    removable_prefix: &str,
) -> Result<Vec<BlockDevice>, serde_json::Error> {
    let output: LsblkOutput = serde_json::from_str(payload)?;

    let devices = output
        .blockdevices
        .into_iter()
        .filter(|disk| disk.kind.as_deref() == Some("disk"))
        .filter(|disk| {
            disk.name
                .as_deref()
                .is_some_and(|name| name.starts_with(removable_prefix))
        })
        .flat_map(|disk| disk.children)
        .filter_map(partition_from_node)
        .collect();
    Ok(devices)
}

fn partition_from_node(node: LsblkNode) -> Option<BlockDevice> {
    let fstype = node.fstype.filter(|fstype| !fstype.trim().is_empty())?;
    let name = node.name.filter(|name| !name.is_empty())?;
    Some(BlockDevice {
        device: format!("/dev/{name}"),
        label: node
            .label
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| UNLABELED.to_string()),
        size: node
            .size
            .map(LsblkSize::into_text)
            .unwrap_or_else(|| UNKNOWN_SIZE.to_string()),
        name,
        fstype,
    })
}

/// Queries `lsblk` for attached removable partitions. Any failure of the
/// query yields an empty list.
pub fn list_devices(config: &MonitorConfig) -> Observed<Vec<BlockDevice>> {
    let output = match Command::new(&config.lsblk_program)
        .args(["-J", "-o", LSBLK_COLUMNS])
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            let issue = Issue::record(
                IssueKind::ExternalProcess,
                format!(
                    "failed to run {}: {err}",
                    config.lsblk_program.display()
                ),
            );
            return Observed::with_issues(Vec::new(), vec![issue]);
        }
    };

    if !output.status.success() {
        let issue = Issue::record(
            IssueKind::ExternalProcess,
            format!(
                "{} exited with {}: {}",
                config.lsblk_program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        );
        return Observed::with_issues(Vec::new(), vec![issue]);
    }

    match parse_block_devices(&String::from_utf8_lossy(&output.stdout), &config.removable_prefix) {
        Ok(devices) => {
            debug!(count = devices.len(), "removable partitions enumerated");
            Observed::clean(devices)
        }
        Err(err) => {
            let issue = Issue::record(
                IssueKind::MalformedData,
                format!("device topology did not parse: {err}"),
            );
            Observed::with_issues(Vec::new(), vec![issue])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{list_devices, parse_block_devices};
    use crate::config::MonitorConfig;
    use crate::issue::IssueKind;

    const TOPOLOGY: &str = r#"{
        "blockdevices": [
            {"name": "nvme0n1", "size": "476.9G", "label": null, "fstype": null, "type": "disk",
             "children": [
                {"name": "nvme0n1p1", "size": "512M", "label": null, "fstype": "vfat", "type": "part"}
             ]},
            {"name": "sda", "size": "119.1G", "label": null, "fstype": null, "type": "disk",
             "children": [
                {"name": "sda1", "size": "119.1G", "label": "CARD_A", "fstype": "exfat", "type": "part"},
                {"name": "sda2", "size": "16M", "label": null, "fstype": null, "type": "part"},
                {"name": "sda3", "size": "1G", "label": null, "fstype": "", "type": "part"}
             ]},
            {"name": "sdb", "size": "14.9G", "label": null, "fstype": "vfat", "type": "disk"},
            {"name": "sdc", "size": "58.2G", "label": null, "fstype": null, "type": "disk",
             "children": [
                {"name": "sdc1", "size": "58.2G", "label": null, "fstype": "ntfs", "type": "part"}
             ]},
            {"name": "sr0", "size": "1024M", "label": null, "fstype": null, "type": "rom"}
        ]
    }"#;

    #[test]
    fn keeps_only_removable_partitions_with_filesystem() {
        let devices = parse_block_devices(TOPOLOGY, "sd").expect("parses");
        let names = devices.iter().map(|d| d.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["sda1", "sdc1"]);

        assert_eq!(devices[0].device, "/dev/sda1");
        assert_eq!(devices[0].label, "CARD_A");
        assert_eq!(devices[0].size, "119.1G");
        assert_eq!(devices[1].label, "Unlabeled");
        assert_eq!(devices[1].fstype, "ntfs");
    }

    #[test]
    fn numeric_sizes_are_kept_as_text() {
        let payload = r#"{"blockdevices": [{"name": "sdd", "type": "disk", "children": [
            {"name": "sdd1", "size": 8053063680, "fstype": "exfat"}
        ]}]}"#;
        let devices = parse_block_devices(payload, "sd").expect("parses");
        assert_eq!(devices[0].size, "8053063680");
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(parse_block_devices("lsblk: unknown column", "sd").is_err());
    }

    #[test]
    fn missing_tool_yields_empty_list() {
        let config = MonitorConfig {
            lsblk_program: "/nonexistent/lsblk".into(),
            ..MonitorConfig::default()
        };
        let observed = list_devices(&config);
        assert!(observed.value.is_empty());
        assert!(observed.has_issue(IssueKind::ExternalProcess));
    }
}
