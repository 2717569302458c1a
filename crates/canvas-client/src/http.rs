//! HTTP implementation of [`RemoteStore`].

use async_trait::async_trait;
use canvas_core::{
    EdgeEntity, FileEntity, FolderEntity, MetadataMap, NodeId, Point, RelationType,
};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::channel::{PushChannel, PushSender, DEFAULT_CHANNEL_CAPACITY};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::sse::EventDecoder;
use crate::store::RemoteStore;
use crate::types::{
    folder_query, ContentBody, DescriptionBody, FolderPatch, NewFile, NewFolder, RunStatus,
};

/// Project store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base: Url,
    config: ClientConfig,
}

impl HttpRemoteStore {
    /// Build a client for the configured base URL.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| ClientError::Config(format!("Invalid URL {}: {}", config.api_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "URL cannot be used as a base: {}",
                config.api_url
            )));
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            base,
            config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Ordinary request with the request timeout applied.
    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.timeout(self.config.request_timeout())
    }

    async fn send(&self, builder: RequestBuilder, resource: &str) -> ClientResult<Response> {
        let response = self.request(builder).send().await?;
        check_status(response, resource).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        resource: &str,
    ) -> ClientResult<T> {
        let response = self.send(builder, resource).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_unit(&self, builder: RequestBuilder, resource: &str) -> ClientResult<()> {
        self.send(builder, resource).await.map(|_| ())
    }
}

/// Map non-success statuses to errors, pulling the `detail` message the store
/// puts in error bodies.
async fn check_status(response: Response, resource: &str) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::not_found(resource));
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Status {
        resource: resource.to_string(),
        status: status.as_u16(),
        message,
    })
}

/// Pump a run response body into a push channel until completion, closure or
/// transport failure.
async fn pump_run_stream(response: Response, tx: PushSender, file: NodeId) {
    let mut stream = response.bytes_stream();
    let mut decoder = EventDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!(file = %file, "run stream closed by consumer");
                return;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => match decoder.push(&bytes) {
                Ok(events) => {
                    for event in events {
                        let terminal = event.is_terminal();
                        if !tx.send(event).await || terminal {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(file = %file, error = %e, "undecodable run stream message");
                }
            },
            Some(Err(e)) => {
                warn!(file = %file, error = %e, "run stream transport error");
                return;
            }
            None => {
                if let Ok(Some(event)) = decoder.finish() {
                    tx.send(event).await;
                }
                return;
            }
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_files(&self) -> ClientResult<Vec<FileEntity>> {
        self.send_json(self.client.get(self.url(&["files"])), "files")
            .await
    }

    async fn list_folders(&self) -> ClientResult<Vec<FolderEntity>> {
        self.send_json(self.client.get(self.url(&["folders"])), "folders")
            .await
    }

    async fn list_edges(&self) -> ClientResult<Vec<EdgeEntity>> {
        self.send_json(self.client.get(self.url(&["edges"])), "edges")
            .await
    }

    async fn get_metadata(&self) -> ClientResult<MetadataMap> {
        self.send_json(self.client.get(self.url(&["metadata"])), "metadata")
            .await
    }

    async fn create_file(&self, file: &NewFile) -> ClientResult<FileEntity> {
        self.send_json(self.client.post(self.url(&["files"])).json(file), "files")
            .await
    }

    async fn update_file_position(&self, id: &NodeId, position: Point) -> ClientResult<()> {
        let builder = self
            .client
            .put(self.url(&["files", id.as_str(), "position"]))
            .query(&[("x", position.x), ("y", position.y)]);
        self.send_unit(builder, &format!("file {id}")).await
    }

    async fn update_file_content(&self, id: &NodeId, content: &str) -> ClientResult<()> {
        let builder = self
            .client
            .put(self.url(&["files", id.as_str(), "content"]))
            .json(&ContentBody {
                content: content.to_string(),
            });
        self.send_unit(builder, &format!("file {id}")).await
    }

    async fn update_file_description(&self, id: &NodeId, description: &str) -> ClientResult<()> {
        let builder = self
            .client
            .put(self.url(&["files", id.as_str(), "description"]))
            .json(&DescriptionBody {
                description: description.to_string(),
            });
        self.send_unit(builder, &format!("file {id}")).await
    }

    async fn move_file_to_folder(
        &self,
        id: &NodeId,
        folder: Option<&NodeId>,
    ) -> ClientResult<()> {
        let builder = self
            .client
            .put(self.url(&["files", id.as_str(), "folder"]))
            .query(&folder_query(folder));
        self.send_unit(builder, &format!("file {id}")).await
    }

    async fn delete_file(&self, id: &NodeId) -> ClientResult<()> {
        let builder = self.client.delete(self.url(&["files", id.as_str()]));
        self.send_unit(builder, &format!("file {id}")).await
    }

    async fn generate_file(&self, id: &NodeId) -> ClientResult<()> {
        // Generation runs a model server-side; only the connect timeout applies.
        let response = self
            .client
            .post(self.url(&["files", id.as_str(), "generate"]))
            .send()
            .await?;
        check_status(response, &format!("file {id}")).await.map(|_| ())
    }

    async fn create_folder(&self, folder: &NewFolder) -> ClientResult<FolderEntity> {
        self.send_json(
            self.client.post(self.url(&["folders"])).json(folder),
            "folders",
        )
        .await
    }

    async fn update_folder(&self, id: &NodeId, patch: &FolderPatch) -> ClientResult<()> {
        let builder = self
            .client
            .put(self.url(&["folders", id.as_str()]))
            .json(patch);
        self.send_unit(builder, &format!("folder {id}")).await
    }

    async fn delete_folder(&self, id: &NodeId) -> ClientResult<()> {
        let builder = self.client.delete(self.url(&["folders", id.as_str()]));
        self.send_unit(builder, &format!("folder {id}")).await
    }

    async fn create_edge(&self, edge: &EdgeEntity) -> ClientResult<()> {
        let builder = self.client.post(self.url(&["edges"])).json(edge);
        self.send_unit(builder, &format!("edge {}", edge.key()))
            .await
    }

    async fn delete_edge(
        &self,
        from: &NodeId,
        to: &NodeId,
        relation: &RelationType,
    ) -> ClientResult<()> {
        let builder = self.client.delete(self.url(&["edges"])).query(&[
            ("from_node", from.as_str()),
            ("to_node", to.as_str()),
            ("edge_type", relation.as_str()),
        ]);
        self.send_unit(builder, &format!("edge {from}->{to}")).await
    }

    async fn run_file(&self, id: &NodeId) -> ClientResult<PushChannel> {
        let response = self
            .client
            .post(self.url(&["files", id.as_str(), "run"]))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response, &format!("file {id}")).await?;

        let (tx, channel) = PushChannel::pair(DEFAULT_CHANNEL_CAPACITY);
        tokio::spawn(pump_run_stream(response, tx, id.clone()));
        debug!(file = %id, "run stream opened");
        Ok(channel)
    }

    async fn stop_file(&self, id: &NodeId) -> ClientResult<()> {
        let builder = self.client.post(self.url(&["files", id.as_str(), "stop"]));
        self.send_unit(builder, &format!("file {id}")).await
    }

    async fn file_status(&self, id: &NodeId) -> ClientResult<RunStatus> {
        self.send_json(
            self.client.get(self.url(&["files", id.as_str(), "status"])),
            &format!("file {id}"),
        )
        .await
    }
}
