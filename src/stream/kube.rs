use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::LogParams, Api, Client};

use crate::errors::AppResult;
use crate::stream::tail::{LogReader, LogSource, TailTarget};

/// Log streams from the Kubernetes API (`pods/log` with `follow=true`).
#[derive(Clone)]
pub struct KubeLogSource {
    client: Client,
}

impl KubeLogSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn open(&self, target: &TailTarget) -> AppResult<LogReader> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);

        let lp = LogParams {
            follow: true,
            timestamps: false,
            previous: false,
            container: Some(target.container.clone()),
            ..Default::default()
        };

        let reader = api.log_stream(&target.pod, &lp).await?;
        Ok(Box::pin(reader))
    }
}
