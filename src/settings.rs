//! Deployment settings persisted through the platform settings table.

use futures::future::join_all;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::AutoscaleSettings;
use crate::platform::CloudPlatform;

pub const DEPLOYMENT_SETTINGS_SAVED: &str = "deployment-settings-saved";
pub const DEFAULT_PASSWORD: &str = "fortigate-default-password";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingItem {
    pub key: String,
    pub value: String,
    pub description: String,
    pub json_encoded: bool,
    pub editable: bool,
}

impl SettingItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            description: description.into(),
            json_encoded: false,
            editable: false,
        }
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }
}

/// Map a deployment parameter name (case-insensitive, e.g. `HeartbeatInterval`)
/// onto its setting item. Unknown parameters map to `None`.
pub fn setting_for_deployment_key(name: &str, value: &str) -> Option<SettingItem> {
    let (key, description, editable) = match name.to_lowercase().as_str() {
        "deploymentsettingssaved" => (
            DEPLOYMENT_SETTINGS_SAVED,
            "A flag setting item that indicates all deployment settings have been saved.",
            false,
        ),
        "desiredcapacity" => ("scaling-group-desired-capacity", "Scaling group desired capacity.", true),
        "minsize" => ("scaling-group-min-size", "Scaling group min size.", true),
        "maxsize" => ("scaling-group-max-size", "Scaling group max size.", true),
        "resourcetagprefix" => ("resource-tag-prefix", "Resource tag prefix.", false),
        "customidentifier" => ("custom-id", "Custom Identifier.", false),
        "uniqueid" => ("unique-id", "Unique ID.", false),
        "assetstoragename" => ("asset-storage-name", "Asset storage name.", false),
        "assetstoragekeyprefix" => ("asset-storage-key-prefix", "Asset storage key prefix.", false),
        "vpcid" => ("vpc-id", "VPC ID of the FortiGate Autoscale.", false),
        "fortigatepsksecret" => (
            "fortigate-psk-secret",
            "The PSK for FortiGate Autoscale Synchronization.",
            false,
        ),
        "fortigateadminport" => (
            "fortigate-admin-port",
            "The port number for administrative login to FortiGate.",
            false,
        ),
        "fortigatesyncinterface" => (
            "fortigate-sync-interface",
            "The interface the FortiGate uses for configuration synchronization.",
            true,
        ),
        "lifecyclehooktimeout" => (
            "lifecycle-hook-timeout",
            "The auto scaling group lifecycle hook timeout time in second.",
            true,
        ),
        "heartbeatinterval" => (
            "heartbeat-interval",
            "The FortiGate sync heartbeat interval in second.",
            true,
        ),
        "masterelectionnowait" => (
            "master-election-no-wait",
            "Do not wait for the new master to come up. This FortiGate can receive the new master ip in one of its following heartbeat sync.",
            true,
        ),
        "heartbeatlosscount" => ("heartbeat-loss-count", "The FortiGate sync heartbeat loss count.", true),
        "autoscalehandlerurl" => ("autoscale-handler-url", "The FortiGate Autoscale handler URL.", false),
        "masterautoscalinggroupname" => (
            "master-auto-scaling-group-name",
            "The name of the master auto scaling group.",
            false,
        ),
        "paygautoscalinggroupname" => (
            "payg-auto-scaling-group-name",
            "The name of the PAYG auto scaling group.",
            false,
        ),
        "byolautoscalinggroupname" => (
            "byol-auto-scaling-group-name",
            "The name of the BYOL auto scaling group.",
            false,
        ),
        "requiredconfigset" => (
            "required-configset",
            "A comma-delimited list of required configsets.",
            false,
        ),
        "transitgatewayid" => (
            "transit-gateway-id",
            "The ID of the Transit Gateway the FortiGate Autoscale is attached to.",
            false,
        ),
        "enabletransitgatewayvpn" => (
            "enable-transit-gateway-vpn",
            "Toggle ON / OFF the Transit Gateway VPN creation on each FortiGate instance",
            false,
        ),
        "enablesecondnic" => (
            "enable-second-nic",
            "Toggle ON / OFF the secondary eni creation on each FortiGate instance",
            false,
        ),
        "bgpasn" => (
            "bgp-asn",
            "The BGP Autonomous System Number of the Customer Gateway of each FortiGate instance in the Auto Scaling Group.",
            true,
        ),
        "transitgatewayvpnhandlername" => (
            "transit-gateway-vpn-handler-name",
            "The Transit Gateway VPN handler function name.",
            false,
        ),
        "transitgatewayroutetableinbound" => (
            "transit-gateway-route-table-inbound",
            "The Id of the Transit Gateway inbound route table.",
            true,
        ),
        "transitgatewayroutetableoutbound" => (
            "transit-gateway-route-table-outbound",
            "The Id of the Transit Gateway outbound route table.",
            false,
        ),
        _ => return None,
    };

    let value = match key {
        "enable-transit-gateway-vpn" | "enable-second-nic" => normalize_toggle(value),
        _ => value.to_string(),
    };

    Some(SettingItem::new(key, value, description).editable(editable))
}

fn normalize_toggle(value: &str) -> String {
    if !value.is_empty() && value != "false" {
        "true".to_string()
    } else {
        "false".to_string()
    }
}

/// Deployment parameters implied by the local configuration, keyed by
/// their deployment names.
pub fn deployment_settings(settings: &AutoscaleSettings) -> HashMap<String, String> {
    HashMap::from([
        (
            "MasterAutoScalingGroupName".to_string(),
            settings.master_scaling_group_name.clone(),
        ),
        (
            "HeartbeatInterval".to_string(),
            settings.heartbeat_interval_secs.to_string(),
        ),
        (
            "HeartbeatLossCount".to_string(),
            settings.heartbeat_loss_count.to_string(),
        ),
        (
            "MasterElectionNoWait".to_string(),
            settings.master_election_no_wait.to_string(),
        ),
        ("DeploymentSettingsSaved".to_string(), "true".to_string()),
    ])
}

/// Save deployment parameters. Returns true only if every recognised
/// parameter was stored.
pub async fn save_settings(platform: &dyn CloudPlatform, settings: &HashMap<String, String>) -> bool {
    let items: Vec<SettingItem> = settings
        .iter()
        .filter_map(|(name, value)| {
            let item = setting_for_deployment_key(name, value);
            if item.is_none() {
                debug!("Ignoring unknown deployment setting: {}", name);
            }
            item
        })
        .collect();

    let results = join_all(items.into_iter().map(|item| async move {
        let key = item.key.clone();
        match platform.set_setting_item(item).await {
            Ok(()) => true,
            Err(e) => {
                error!("failed to save setting for key: {}. Error: {}", key, e);
                false
            }
        }
    }))
    .await;

    results.into_iter().all(|saved| saved)
}
