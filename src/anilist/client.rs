//! Typed AniList operations on top of [`ApiGateway`].

use log::{debug, warn};
use serde_json::{json, Value};

use crate::anilist::gateway::{ApiGateway, GatewayError, GatewayOutcome};
use crate::anilist::queries::{
    MANGA_LIST_CHUNK_QUERY, MEDIA_FORMAT_QUERY, SAVE_ENTRY_MUTATION, SEARCH_MANGA_QUERY,
    VIEWER_QUERY,
};
use crate::anilist::{
    CandidateMedia, MangaCatalog, MediaListStatus, RemoteListEntry, SaveEntryVariables,
};
use crate::error::SyncError;

const HTTP_BAD_REQUEST: u16 = 400;
const HTTP_UNAUTHORIZED: u16 = 401;

/// AniList catalog client.
pub struct AniListClient {
    gateway: ApiGateway,
    list_chunk_size: u32,
}

impl AniListClient {
    pub fn new(gateway: ApiGateway, list_chunk_size: u32) -> Self {
        Self {
            gateway,
            list_chunk_size: list_chunk_size.max(1),
        }
    }

    fn data(body: &Value) -> Option<&Value> {
        body.get("data").filter(|data| !data.is_null())
    }

    fn optional_string(value: Option<&Value>) -> Option<String> {
        value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(ToOwned::to_owned)
    }

    fn parse_candidate(media: &Value) -> Option<CandidateMedia> {
        let id = media.get("id")?.as_u64()?;
        let title = media.get("title");
        let synonyms = media
            .get("synonyms")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| Self::optional_string(Some(item)))
                    .collect()
            })
            .unwrap_or_default();
        Some(CandidateMedia {
            id,
            romaji: Self::optional_string(title.and_then(|value| value.get("romaji"))),
            english: Self::optional_string(title.and_then(|value| value.get("english"))),
            native: Self::optional_string(title.and_then(|value| value.get("native"))),
            synonyms,
        })
    }

    fn parse_list_entry(entry: &Value) -> Option<RemoteListEntry> {
        let media_id = entry.get("mediaId")?.as_u64()?;
        let progress = entry
            .get("progress")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let status = entry
            .get("status")
            .and_then(Value::as_str)
            .map(MediaListStatus::from_api)
            .unwrap_or(MediaListStatus::Other(String::new()));
        Some(RemoteListEntry {
            media_id,
            progress: u32::try_from(progress).unwrap_or(u32::MAX),
            status,
        })
    }

    /// Returns the list entries of one chunk, or `None` once `lists` comes back empty.
    ///
    /// An unanswered chunk is an error: a partial snapshot would make listed
    /// titles look absent and get re-pushed.
    fn fetch_list_chunk(
        &self,
        user_id: u64,
        chunk: u32,
    ) -> Result<Option<Vec<RemoteListEntry>>, GatewayError> {
        let Some(body) = self.gateway.send(
            MANGA_LIST_CHUNK_QUERY,
            Some(json!({
                "userId": user_id,
                "chunk": chunk,
                "perChunk": self.list_chunk_size,
            })),
        )?
        else {
            warn!("Failed to fetch manga list chunk {chunk}");
            return Err(GatewayError::ListUnavailable { chunk });
        };

        let Some(lists) = Self::data(&body)
            .and_then(|data| data.get("MediaListCollection"))
            .and_then(|collection| collection.get("lists"))
            .and_then(Value::as_array)
        else {
            warn!("Manga list chunk {chunk} has no lists field");
            return Err(GatewayError::ListUnavailable { chunk });
        };
        if lists.is_empty() {
            return Ok(None);
        }

        Ok(Some(
            lists
                .iter()
                .filter_map(|list| list.get("entries").and_then(Value::as_array))
                .flatten()
                .filter_map(Self::parse_list_entry)
                .collect(),
        ))
    }
}

impl MangaCatalog for AniListClient {
    fn viewer_id(&self) -> Result<u64, SyncError> {
        match self.gateway.execute(VIEWER_QUERY, None)? {
            GatewayOutcome::Data(body) => Self::data(&body)
                .and_then(|data| data.get("Viewer"))
                .and_then(|viewer| viewer.get("id"))
                .and_then(Value::as_u64)
                .ok_or(SyncError::ViewerUnavailable),
            GatewayOutcome::Absent {
                status: status @ (HTTP_BAD_REQUEST | HTTP_UNAUTHORIZED),
            } => Err(SyncError::TokenInvalid { status }),
            GatewayOutcome::Absent { status } => {
                warn!("Viewer lookup failed with HTTP {status}");
                Err(SyncError::ViewerUnavailable)
            }
        }
    }

    fn fetch_manga_list(&self, user_id: u64) -> Result<Vec<RemoteListEntry>, GatewayError> {
        let mut entries = Vec::new();
        let mut chunk = 1u32;
        while let Some(chunk_entries) = self.fetch_list_chunk(user_id, chunk)? {
            debug!("Fetched {} list entries from chunk {chunk}", chunk_entries.len());
            entries.extend(chunk_entries);
            chunk = chunk.saturating_add(1);
        }
        Ok(entries)
    }

    fn search_manga(
        &self,
        title: &str,
        per_page: u32,
    ) -> Result<Option<Vec<CandidateMedia>>, GatewayError> {
        let Some(body) = self.gateway.send(
            SEARCH_MANGA_QUERY,
            Some(json!({"search": title, "page": 1, "perPage": per_page})),
        )?
        else {
            return Ok(None);
        };
        let media = Self::data(&body)
            .and_then(|data| data.get("Page"))
            .and_then(|page| page.get("media"))
            .and_then(Value::as_array);
        Ok(media.map(|items| items.iter().filter_map(Self::parse_candidate).collect()))
    }

    fn media_format(&self, media_id: u64) -> Result<Option<String>, GatewayError> {
        let Some(body) = self
            .gateway
            .send(MEDIA_FORMAT_QUERY, Some(json!({"id": media_id})))?
        else {
            return Ok(None);
        };
        Ok(Self::optional_string(
            Self::data(&body)
                .and_then(|data| data.get("Media"))
                .and_then(|media| media.get("format")),
        ))
    }

    fn save_entry(&self, variables: &SaveEntryVariables) -> Result<Option<Value>, GatewayError> {
        let Some(body) = self
            .gateway
            .send(SAVE_ENTRY_MUTATION, Some(variables.to_variables()))?
        else {
            return Ok(None);
        };
        Ok(Self::data(&body)
            .and_then(|data| data.get("SaveMediaListEntry"))
            .filter(|saved| !saved.is_null())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::AniListClient;
    use crate::anilist::gateway::testing::{RecordingSleeper, ScriptedTransport};
    use crate::anilist::gateway::{ApiGateway, GatewayError, RetryPolicy};
    use crate::anilist::{MangaCatalog, MediaListStatus, SaveEntryVariables};
    use crate::error::SyncError;

    fn client(transport: &ScriptedTransport) -> AniListClient {
        let gateway = ApiGateway::new(
            Box::new(transport.clone()),
            Arc::new(RecordingSleeper::default()),
            RetryPolicy::default(),
        );
        AniListClient::new(gateway, 2)
    }

    #[test]
    fn test_viewer_id_parses_data() {
        let transport = ScriptedTransport::default();
        transport.push(200, r#"{"data":{"Viewer":{"id":5120}}}"#);

        assert_eq!(client(&transport).viewer_id().expect("viewer id"), 5120);
    }

    #[test]
    fn test_viewer_id_unauthorized_is_token_invalid() {
        let transport = ScriptedTransport::default();
        transport.push(401, r#"{"errors":[{"message":"Invalid token"}]}"#);

        let result = client(&transport).viewer_id();

        assert!(matches!(result, Err(SyncError::TokenInvalid { status: 401 })));
    }

    #[test]
    fn test_fetch_manga_list_pages_until_empty_lists() {
        let transport = ScriptedTransport::default();
        transport
            .push(
                200,
                r#"{"data":{"MediaListCollection":{"lists":[
                    {"entries":[{"mediaId":1,"progress":10,"status":"CURRENT"}]},
                    {"entries":[{"mediaId":2,"progress":0,"status":"PLANNING"}]}
                ]}}}"#,
            )
            .push(
                200,
                r#"{"data":{"MediaListCollection":{"lists":[
                    {"entries":[{"mediaId":3,"progress":99,"status":"COMPLETED"}]}
                ]}}}"#,
            )
            .push(200, r#"{"data":{"MediaListCollection":{"lists":[]}}}"#);

        let entries = client(&transport)
            .fetch_manga_list(77)
            .expect("list fetch should succeed");

        let ids: Vec<u64> = entries.iter().map(|entry| entry.media_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(entries[0].status, MediaListStatus::Current);
        assert_eq!(entries[2].progress, 99);
        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[1]["variables"],
            json!({"userId": 77, "chunk": 2, "perChunk": 2})
        );
    }

    #[test]
    fn test_fetch_manga_list_fails_when_first_chunk_errors() {
        let transport = ScriptedTransport::default();
        for _ in 0..4 {
            transport.push(500, "{}");
        }

        let result = client(&transport).fetch_manga_list(7);

        assert!(matches!(
            result,
            Err(GatewayError::ListUnavailable { chunk: 1 })
        ));
        assert_eq!(transport.sent().len(), 4);
    }

    #[test]
    fn test_fetch_manga_list_fails_instead_of_truncating() {
        let transport = ScriptedTransport::default();
        transport
            .push(
                200,
                r#"{"data":{"MediaListCollection":{"lists":[
                    {"entries":[{"mediaId":1,"progress":10,"status":"CURRENT"}]}
                ]}}}"#,
            )
            .push(404, "{}");

        let result = client(&transport).fetch_manga_list(7);

        assert!(matches!(
            result,
            Err(GatewayError::ListUnavailable { chunk: 2 })
        ));
    }

    #[test]
    fn test_fetch_manga_list_missing_lists_field_is_an_error() {
        let transport = ScriptedTransport::default();
        transport.push(200, r#"{"data":{"MediaListCollection":null}}"#);

        let result = client(&transport).fetch_manga_list(7);

        assert!(matches!(
            result,
            Err(GatewayError::ListUnavailable { chunk: 1 })
        ));
    }

    #[test]
    fn test_search_manga_parses_title_variants() {
        let transport = ScriptedTransport::default();
        transport.push(
            200,
            r#"{"data":{"Page":{"media":[
                {"id":53390,"title":{"romaji":"Shingeki no Kyojin","english":"Attack on Titan","native":"進撃の巨人"},"synonyms":["AoT",""]},
                {"id":1,"title":null,"synonyms":null}
            ]}}}"#,
        );

        let candidates = client(&transport)
            .search_manga("Attack on Titan", 100)
            .expect("search should succeed")
            .expect("search should return candidates");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, 53390);
        assert_eq!(candidates[0].english.as_deref(), Some("Attack on Titan"));
        assert_eq!(candidates[0].synonyms, vec!["AoT".to_string()]);
        assert_eq!(candidates[1].title_variants().count(), 0);
        assert_eq!(
            transport.sent()[0]["variables"],
            json!({"search": "Attack on Titan", "page": 1, "perPage": 100})
        );
    }

    #[test]
    fn test_search_manga_absent_on_client_error() {
        let transport = ScriptedTransport::default();
        transport.push(404, "{}");

        let result = client(&transport)
            .search_manga("Nothing", 100)
            .expect("404 should not be an error");

        assert_eq!(result, None);
    }

    #[test]
    fn test_media_format_reads_format() {
        let transport = ScriptedTransport::default();
        transport.push(200, r#"{"data":{"Media":{"id":9,"format":"NOVEL"}}}"#);

        let format = client(&transport).media_format(9).expect("format lookup");

        assert_eq!(format.as_deref(), Some("NOVEL"));
    }

    #[test]
    fn test_save_entry_returns_saved_payload() {
        let transport = ScriptedTransport::default();
        transport.push(
            200,
            r#"{"data":{"SaveMediaListEntry":{"id":1,"mediaId":9,"status":"CURRENT","progress":3,"private":false}}}"#,
        );
        let variables = SaveEntryVariables::new(9)
            .with_status(MediaListStatus::Current)
            .with_progress(Some(3))
            .with_private(false);

        let saved = client(&transport)
            .save_entry(&variables)
            .expect("save should succeed");

        assert_eq!(saved.and_then(|value| value["progress"].as_u64()), Some(3));
        assert_eq!(
            transport.sent()[0]["variables"],
            json!({"mediaId": 9, "status": "CURRENT", "progress": 3, "private": false})
        );
    }

    #[test]
    fn test_save_entry_null_payload_is_none() {
        let transport = ScriptedTransport::default();
        transport.push(200, r#"{"data":{"SaveMediaListEntry":null}}"#);

        let saved = client(&transport)
            .save_entry(&SaveEntryVariables::new(9))
            .expect("save should not error");

        assert_eq!(saved, None);
    }
}
