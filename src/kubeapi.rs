use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::{autoscaling::v2::HorizontalPodAutoscaler, events::v1::Event};
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    config::KubeConfigOptions,
    Client,
};
use serde_json::json;
use std::fmt;

use super::{ErrorKind, Result, MANAGER};

/// Client creator
///
/// Local runs read the kubeconfig (`KUBECONFIG` or `~/.kube/config`),
/// everything else uses the mounted service account.
pub async fn make_client(local: bool) -> Result<Client> {
    let config = if local {
        kube::Config::from_kubeconfig(&KubeConfigOptions::default())
            .await
            .map_err(|e| ErrorKind::KubeConfig(e.to_string()))?
    } else {
        kube::Config::incluster().map_err(|e| ErrorKind::KubeConfig(e.to_string()))?
    };
    let client = Client::try_from(config).map_err(|e| ErrorKind::KubeConfig(e.to_string()))?;
    Ok(client)
}

/// Identity of the HorizontalPodAutoscaler we manage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HpaTarget {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for HpaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The parts of a fetched HorizontalPodAutoscaler we care about
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScaleState {
    pub uid: Option<String>,
    /// `spec.minReplicas`, unset means the apiserver default
    pub min_replicas: Option<i32>,
}

impl From<HorizontalPodAutoscaler> for ScaleState {
    fn from(hpa: HorizontalPodAutoscaler) -> Self {
        ScaleState {
            uid: hpa.metadata.uid,
            min_replicas: hpa.spec.and_then(|s| s.min_replicas),
        }
    }
}

/// Audit record for a changed floor
#[derive(Clone, Debug, PartialEq)]
pub struct ScaleEvent {
    pub target: HpaTarget,
    pub uid: Option<String>,
    pub min_replicas: i32,
    pub timestamp: DateTime<Utc>,
}

impl ScaleEvent {
    pub fn new(target: &HpaTarget, uid: Option<String>, min_replicas: i32) -> Self {
        ScaleEvent {
            target: target.clone(),
            uid,
            min_replicas,
            timestamp: Utc::now(),
        }
    }

    pub fn note(&self) -> String {
        format!("{} set minReplicas to {}", MANAGER, self.min_replicas)
    }

    /// events.k8s.io/v1 representation
    ///
    /// Uses generateName so repeated scalings never collide on a name.
    pub fn to_event(&self) -> Result<Event> {
        let ev = json!({
            "apiVersion": "events.k8s.io/v1",
            "kind": "Event",
            "metadata": {
                "generateName": format!("{}-", MANAGER),
                "namespace": self.target.namespace,
            },
            "eventTime": self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "reportingController": MANAGER,
            "reportingInstance": MANAGER,
            "action": "Scaled",
            "reason": "HPATimeScaleEvent",
            "type": "Normal",
            "note": self.note(),
            "regarding": {
                "apiVersion": "autoscaling/v2",
                "kind": "HorizontalPodAutoscaler",
                "namespace": self.target.namespace,
                "name": self.target.name,
                "uid": self.uid,
            },
        });
        Ok(serde_json::from_value(ev)?)
    }
}

/// The three calls the reconciler needs from the orchestration api
#[allow(async_fn_in_trait)]
pub trait AutoscalerApi {
    /// Fetch current state, `MissingHpa` if it does not exist
    async fn fetch(&self, target: &HpaTarget) -> Result<ScaleState>;
    /// Merge patch `spec.minReplicas` only
    async fn patch_min_replicas(&self, target: &HpaTarget, replicas: i32) -> Result<()>;
    async fn emit(&self, event: &ScaleEvent) -> Result<()>;
}

/// Interface for dealing with horizontalpodautoscalers
#[derive(Clone)]
pub struct HpaKube {
    client: Client,
}

impl HpaKube {
    pub fn new(client: Client) -> Self {
        HpaKube { client }
    }

    pub async fn infer(local: bool) -> Result<Self> {
        Ok(Self::new(make_client(local).await?))
    }
}

impl AutoscalerApi for HpaKube {
    async fn fetch(&self, target: &HpaTarget) -> Result<ScaleState> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), &target.namespace);
        match api.get_opt(&target.name).await.map_err(ErrorKind::KubeError)? {
            Some(hpa) => Ok(hpa.into()),
            None => bail!(ErrorKind::MissingHpa(target.namespace.clone(), target.name.clone())),
        }
    }

    async fn patch_min_replicas(&self, target: &HpaTarget, replicas: i32) -> Result<()> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), &target.namespace);
        let pp = PatchParams {
            field_manager: Some(MANAGER.into()),
            ..Default::default()
        };
        let data = json!({ "spec": { "minReplicas": replicas } });
        let o = api
            .patch(&target.name, &pp, &Patch::Merge(&data))
            .await
            .map_err(ErrorKind::KubeError)?;
        debug!("Patched spec: {:?}", o.spec);
        Ok(())
    }

    async fn emit(&self, event: &ScaleEvent) -> Result<()> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), &event.target.namespace);
        let pp = PostParams {
            field_manager: Some(MANAGER.into()),
            ..Default::default()
        };
        let o = api
            .create(&pp, &event.to_event()?)
            .await
            .map_err(ErrorKind::KubeError)?;
        debug!("Created event {:?}", o.metadata.name);
        Ok(())
    }
}

/// Wrapper that reads through but only logs the writes
pub struct DryRun<'a, A>(pub &'a A);

impl<'a, A: AutoscalerApi> AutoscalerApi for DryRun<'a, A> {
    async fn fetch(&self, target: &HpaTarget) -> Result<ScaleState> {
        self.0.fetch(target).await
    }

    async fn patch_min_replicas(&self, target: &HpaTarget, replicas: i32) -> Result<()> {
        info!("Dry run: would set min replicas on {} to {}", target, replicas);
        Ok(())
    }

    async fn emit(&self, event: &ScaleEvent) -> Result<()> {
        info!("Dry run: would record event on {}: {}", event.target, event.note());
        Ok(())
    }
}

/// Drive the autoscaler floor towards `desired`
///
/// Fetches once, patches only when the floor differs, then records an event.
/// Returns whether a change was made. Fetch and patch failures propagate untouched,
/// a failure to record the event is only logged.
pub async fn reconcile<A: AutoscalerApi>(api: &A, target: &HpaTarget, desired: i32) -> Result<bool> {
    let state = api.fetch(target).await.map_err(|e| {
        error!("Failed to get HPA {}", target);
        e
    })?;
    trace!("Fetched {}: {:?}", target, state);

    if state.min_replicas == Some(desired) {
        info!("HPA {} already has min replicas set to {}", target, desired);
        return Ok(false);
    }

    match state.min_replicas {
        Some(current) => info!("Setting min replicas on {} from {} to {}", target, current, desired),
        None => info!("Setting min replicas on {} to {}", target, desired),
    }
    api.patch_min_replicas(target, desired).await.map_err(|e| {
        error!("Failed to update HPA {}", target);
        e
    })?;

    let event = ScaleEvent::new(target, state.uid, desired);
    match api.emit(&event).await {
        Ok(()) => debug!("Recorded scale event on {}", target),
        Err(e) => warn!("Failed to record scale event on {}: {}", target, e),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::{HpaTarget, ScaleEvent, ScaleState};
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
    use serde_json::json;

    fn target() -> HpaTarget {
        HpaTarget {
            namespace: "shop".into(),
            name: "web".into(),
        }
    }

    #[test]
    fn scale_state_from_hpa() {
        let hpa: HorizontalPodAutoscaler = serde_json::from_value(json!({
            "apiVersion": "autoscaling/v2",
            "kind": "HorizontalPodAutoscaler",
            "metadata": { "name": "web", "namespace": "shop", "uid": "abc-123" },
            "spec": {
                "minReplicas": 3,
                "maxReplicas": 10,
                "scaleTargetRef": { "apiVersion": "apps/v1", "kind": "Deployment", "name": "web" }
            }
        }))
        .unwrap();
        let state = ScaleState::from(hpa);
        assert_eq!(state.uid.as_deref(), Some("abc-123"));
        assert_eq!(state.min_replicas, Some(3));
    }

    #[test]
    fn event_regards_the_hpa() {
        let mut ev = ScaleEvent::new(&target(), Some("abc-123".into()), 2);
        ev.timestamp = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        assert_eq!(ev.note(), "hpa-time-scaler set minReplicas to 2");

        let kev = ev.to_event().unwrap();
        assert_eq!(kev.metadata.generate_name.as_deref(), Some("hpa-time-scaler-"));
        assert_eq!(kev.metadata.namespace.as_deref(), Some("shop"));
        assert_eq!(kev.reason.as_deref(), Some("HPATimeScaleEvent"));
        assert_eq!(kev.action.as_deref(), Some("Scaled"));
        assert_eq!(kev.type_.as_deref(), Some("Normal"));
        assert_eq!(kev.reporting_controller.as_deref(), Some("hpa-time-scaler"));
        let regarding = kev.regarding.unwrap();
        assert_eq!(regarding.kind.as_deref(), Some("HorizontalPodAutoscaler"));
        assert_eq!(regarding.name.as_deref(), Some("web"));
        assert_eq!(regarding.uid.as_deref(), Some("abc-123"));
    }
}
