//! GraphQL documents sent to AniList. Variable names are part of the remote contract.

pub const VIEWER_QUERY: &str = r#"
query {
  Viewer {
    id
  }
}
"#;

pub const MANGA_LIST_CHUNK_QUERY: &str = r#"
query ($userId: Int, $chunk: Int, $perChunk: Int) {
  MediaListCollection(userId: $userId, type: MANGA, chunk: $chunk, perChunk: $perChunk) {
    lists {
      entries {
        mediaId
        progress
        status
      }
    }
  }
}
"#;

pub const SEARCH_MANGA_QUERY: &str = r#"
query ($search: String, $page: Int, $perPage: Int) {
  Page(page: $page, perPage: $perPage) {
    media(search: $search, type: MANGA) {
      id
      title {
        romaji
        english
        native
      }
      synonyms
    }
  }
}
"#;

pub const MEDIA_FORMAT_QUERY: &str = r#"
query ($id: Int) {
  Media(id: $id) {
    id
    format
  }
}
"#;

pub const SAVE_ENTRY_MUTATION: &str = r#"
mutation ($mediaId: Int, $status: MediaListStatus, $progress: Int, $private: Boolean) {
  SaveMediaListEntry(mediaId: $mediaId, status: $status, progress: $progress, private: $private) {
    id
    mediaId
    status
    progress
    private
  }
}
"#;
