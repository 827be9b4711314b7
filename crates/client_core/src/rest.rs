use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::RoomId,
    error::ApiError,
    protocol::{AuthRequest, AuthResponse, MessagePayload, RoomSummary},
};
use tracing::{debug, info};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Source of a room's message history, oldest first.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn fetch_history(
        &self,
        room_id: RoomId,
        auth_token: &str,
    ) -> ClientResult<Vec<MessagePayload>>;
}

/// HTTP client for the chat backend's `/api` surface.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    api_base: Url,
}

impl RestClient {
    pub fn new(server_url: &str) -> ClientResult<Self> {
        let mut api_base = Url::parse(server_url.trim())
            .map_err(|err| ClientError::Config(format!("invalid server url '{server_url}': {err}")))?;
        if api_base.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "server url '{server_url}' cannot be used as a base"
            )));
        }
        api_base
            .path_segments_mut()
            .map_err(|_| ClientError::Config(format!("invalid server url '{server_url}'")))?
            .pop_if_empty()
            .push("api");
        Ok(Self {
            http: Client::new(),
            api_base,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    pub async fn signup(&self, username: &str, password: &str) -> ClientResult<()> {
        let request = auth_request(username, password)?;
        let response = self
            .http
            .post(self.endpoint(&["auth", "signup"]))
            .json(&request)
            .send()
            .await?;
        check_status(response).await?;
        info!(username = %request.username, "rest: signup accepted");
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<AuthResponse> {
        let request = auth_request(username, password)?;
        let response = self
            .http
            .post(self.endpoint(&["auth", "login"]))
            .json(&request)
            .send()
            .await?;
        let auth: AuthResponse = check_status(response).await?.json().await?;
        info!(username = %auth.username, "rest: logged in");
        Ok(auth)
    }

    pub async fn list_rooms(&self, auth_token: &str) -> ClientResult<Vec<RoomSummary>> {
        let response = self
            .http
            .get(self.endpoint(&["rooms"]))
            .bearer_auth(auth_token)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn create_room(&self, auth_token: &str, name: &str) -> ClientResult<RoomSummary> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("room name must not be empty".to_string()));
        }
        let response = self
            .http
            .post(self.endpoint(&["rooms"]))
            .bearer_auth(auth_token)
            .form(&[("name", name)])
            .send()
            .await?;
        let room: RoomSummary = check_status(response).await?.json().await?;
        info!(room_id = room.id.0, name = %room.name, "rest: room created");
        Ok(room)
    }

    /// Returns the invite code minted by the server.
    pub async fn create_invite(&self, auth_token: &str, room_id: RoomId) -> ClientResult<String> {
        let response = self
            .http
            .post(self.endpoint(&["rooms", &room_id.0.to_string(), "invites"]))
            .bearer_auth(auth_token)
            .send()
            .await?;
        let code = check_status(response).await?.text().await?;
        Ok(code.trim().trim_matches('"').to_string())
    }

    pub async fn accept_invite(&self, auth_token: &str, code: &str) -> ClientResult<RoomSummary> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ClientError::Validation("invite code must not be empty".to_string()));
        }
        let response = self
            .http
            .post(self.endpoint(&["invites", code, "accept"]))
            .bearer_auth(auth_token)
            .send()
            .await?;
        let room: RoomSummary = check_status(response).await?.json().await?;
        info!(room_id = room.id.0, "rest: invite accepted");
        Ok(room)
    }

    async fn get_history(
        &self,
        room_id: RoomId,
        auth_token: &str,
    ) -> ClientResult<Vec<MessagePayload>> {
        let response = self
            .http
            .get(self.endpoint(&["rooms", &room_id.0.to_string(), "messages"]))
            .bearer_auth(auth_token)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

#[async_trait]
impl HistoryProvider for RestClient {
    async fn fetch_history(
        &self,
        room_id: RoomId,
        auth_token: &str,
    ) -> ClientResult<Vec<MessagePayload>> {
        match self.get_history(room_id, auth_token).await {
            Ok(history) => {
                debug!(room_id = room_id.0, count = history.len(), "rest: history loaded");
                Ok(history)
            }
            Err(err @ ClientError::AuthRejected(_)) => Err(err),
            Err(err) => Err(ClientError::HistoryUnavailable(err.to_string())),
        }
    }
}

fn auth_request(username: &str, password: &str) -> ClientResult<AuthRequest> {
    let username = username.trim();
    let password = password.trim();
    if username.is_empty() || password.is_empty() {
        return Err(ClientError::Validation(
            "username and password are required".to_string(),
        ));
    }
    Ok(AuthRequest {
        username: username.to_string(),
        password: password.to_string(),
    })
}

async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let reason = if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        };
        return Err(ClientError::AuthRejected(reason));
    }
    Err(ApiError::from_status(status.as_u16(), body).into())
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
