//! Control plane assembly from the config file

use anyhow::{Context, Result, anyhow, bail};
use nimbus_cloud::{CloudAdapter, MemoryAdapter, PollConfig, ResourceKind};
use nimbus_cloud_sakura::SakuraCloudAdapter;
use nimbus_config::{DeferredDeleteMode, NimbusConfig, ProviderSettings};
use nimbus_controlplane::{
    AdapterRegistry, ControlPlane, DeferredDeletePolicy, HttpSchedulerClient, MemoryQuotaLedger,
    SchedulerClient, SyncScope, UnavailableScheduler,
};
use std::sync::Arc;
use std::time::Duration;

pub fn build_adapter(provider: &ProviderSettings) -> Result<Arc<dyn CloudAdapter>> {
    match provider.provider.as_str() {
        "sakura-cloud" => {
            let zone = provider.zone.as_deref().ok_or_else(|| {
                anyhow!("provider {} (sakura-cloud) needs a zone", provider.manager_id)
            })?;
            Ok(Arc::new(SakuraCloudAdapter::new(zone)))
        }
        "memory" => Ok(Arc::new(MemoryAdapter::named(&provider.manager_id))),
        other => bail!(
            "provider {}: unknown provider type '{}' (expected sakura-cloud or memory)",
            provider.manager_id,
            other
        ),
    }
}

pub fn build_adapters(config: &NimbusConfig) -> Result<AdapterRegistry> {
    let mut adapters = AdapterRegistry::new();
    for provider in &config.providers {
        adapters.register(&provider.manager_id, build_adapter(provider)?);
    }
    Ok(adapters)
}

fn parse_kind(kind: &str) -> Result<ResourceKind> {
    kind.parse::<ResourceKind>().map_err(|e| anyhow!(e))
}

/// One scope per configured provider and resource kind
pub fn sync_scopes(config: &NimbusConfig, adapters: &AdapterRegistry) -> Result<Vec<SyncScope>> {
    let mut scopes = Vec::new();
    for provider in &config.providers {
        let adapter = adapters.get(&provider.manager_id)?;
        let kinds = if provider.kinds.is_empty() {
            adapter.capabilities().to_vec()
        } else {
            provider
                .kinds
                .iter()
                .map(|k| parse_kind(k))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("provider {}", provider.manager_id))?
        };

        for kind in kinds {
            if !adapter.supports(kind) {
                bail!(
                    "provider {} ({}) cannot sync {}",
                    provider.manager_id,
                    adapter.name(),
                    kind
                );
            }
            let mut scope = SyncScope::new(kind, &provider.manager_id, &provider.owner_project_id);
            if let Some(zone) = &provider.zone {
                scope = scope.with_region(zone);
            }
            scopes.push(scope);
        }
    }
    Ok(scopes)
}

pub fn deferred_delete_policy(config: &NimbusConfig) -> DeferredDeletePolicy {
    match config.deferred_delete.policy {
        DeferredDeleteMode::EveryPass => DeferredDeletePolicy::EveryPass,
        DeferredDeleteMode::Never => DeferredDeletePolicy::Never,
        DeferredDeleteMode::After => {
            DeferredDeletePolicy::After(Duration::from_secs(config.deferred_delete.after_secs))
        }
    }
}

pub fn poll_config(config: &NimbusConfig) -> PollConfig {
    PollConfig {
        interval_ms: config.poll.interval_ms,
        max_interval_ms: config.poll.max_interval_ms,
        deadline_secs: config.poll.deadline_secs,
        ..Default::default()
    }
}

pub fn quota_ledger(config: &NimbusConfig) -> Result<MemoryQuotaLedger> {
    let mut ledger = MemoryQuotaLedger::new();
    for (owner, limits) in &config.quota {
        for (kind, limit) in limits {
            let kind = parse_kind(kind).with_context(|| format!("quota of {}", owner))?;
            ledger = ledger.with_limit(owner, kind, *limit);
        }
    }
    Ok(ledger)
}

pub fn scheduler(config: &NimbusConfig) -> Result<Arc<dyn SchedulerClient>> {
    match &config.scheduler.endpoint {
        Some(endpoint) => {
            let timeout = config.scheduler.timeout_secs.map(Duration::from_secs);
            Ok(Arc::new(HttpSchedulerClient::new(endpoint, timeout)?))
        }
        None => {
            tracing::warn!("No scheduler endpoint configured, placement is unavailable");
            Ok(Arc::new(UnavailableScheduler))
        }
    }
}

pub async fn build_plane(config: &NimbusConfig) -> Result<ControlPlane> {
    let plane = ControlPlane::builder()
        .adapters(build_adapters(config)?)
        .quota(Arc::new(quota_ledger(config)?))
        .scheduler(scheduler(config)?)
        .state_dir(&config.state_dir)
        .lock_timeout(Duration::from_secs(config.lock_timeout_secs))
        .poll(poll_config(config))
        .deferred_delete(deferred_delete_policy(config))
        .build()
        .await
        .with_context(|| format!("opening state in {}", config.state_dir.display()))?;
    Ok(plane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_config::DeferredDeleteSettings;
    use std::collections::HashMap;

    fn memory_provider(manager_id: &str, kinds: &[&str]) -> ProviderSettings {
        ProviderSettings {
            manager_id: manager_id.to_string(),
            provider: "memory".to_string(),
            zone: Some("tk1a".to_string()),
            owner_project_id: "project-a".to_string(),
            kinds: kinds.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_scopes_default_to_adapter_capabilities() {
        let config = NimbusConfig {
            providers: vec![memory_provider("m1", &[])],
            ..Default::default()
        };
        let adapters = build_adapters(&config).unwrap();
        let scopes = sync_scopes(&config, &adapters).unwrap();
        assert_eq!(scopes.len(), ResourceKind::ALL.len());
        assert!(scopes.iter().all(|s| s.region_id.as_deref() == Some("tk1a")));
    }

    #[test]
    fn test_scopes_from_listed_kinds() {
        let config = NimbusConfig {
            providers: vec![memory_provider("m1", &["zone", "disk"])],
            ..Default::default()
        };
        let adapters = build_adapters(&config).unwrap();
        let kinds: Vec<ResourceKind> = sync_scopes(&config, &adapters)
            .unwrap()
            .into_iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(kinds, vec![ResourceKind::Zone, ResourceKind::Disk]);

        let bad = NimbusConfig {
            providers: vec![memory_provider("m1", &["vpc"])],
            ..Default::default()
        };
        assert!(sync_scopes(&bad, &build_adapters(&bad).unwrap()).is_err());
    }

    #[test]
    fn test_sakura_needs_zone() {
        let mut provider = memory_provider("s1", &[]);
        provider.provider = "sakura-cloud".to_string();
        provider.zone = None;
        assert!(build_adapter(&provider).is_err());

        provider.provider = "aws".to_string();
        let err = build_adapter(&provider).err().unwrap();
        assert!(err.to_string().contains("unknown provider type"));
    }

    #[test]
    fn test_deferred_delete_mapping() {
        let mut config = NimbusConfig::default();
        assert_eq!(
            deferred_delete_policy(&config),
            DeferredDeletePolicy::After(Duration::from_secs(3600))
        );
        config.deferred_delete = DeferredDeleteSettings {
            policy: DeferredDeleteMode::Never,
            after_secs: 0,
        };
        assert_eq!(deferred_delete_policy(&config), DeferredDeletePolicy::Never);
    }

    #[test]
    fn test_quota_limits_need_known_kinds() {
        let mut config = NimbusConfig::default();
        config.quota.insert(
            "project-a".to_string(),
            HashMap::from([("disk".to_string(), 100)]),
        );
        assert!(quota_ledger(&config).is_ok());

        config.quota.insert(
            "project-b".to_string(),
            HashMap::from([("gpu".to_string(), 1)]),
        );
        assert!(quota_ledger(&config).is_err());
    }

    #[tokio::test]
    async fn test_build_plane_with_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = NimbusConfig {
            state_dir: dir.path().join("state"),
            providers: vec![memory_provider("m1", &[])],
            ..Default::default()
        };
        let plane = build_plane(&config).await.unwrap();
        assert_eq!(plane.services().adapters.len(), 1);
        assert!(dir.path().join("state").exists());
    }
}
