//! URL helpers for backend endpoints and folder references.

/// Strip trailing slashes so endpoint paths can be appended safely.
///
/// ```
/// use foldertalk::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:8000/"), "http://localhost:8000");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a backend base URL and an endpoint path without doubling slashes.
///
/// ```
/// use foldertalk::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:8000/", "/index"),
///     "http://localhost:8000/index"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Canonical form of a folder reference, used to detect resubmissions.
pub fn normalize_folder_reference(reference: &str) -> String {
    reference.trim().trim_end_matches('/').to_string()
}

/// Extracts the folder id from a Google Drive folder link.
///
/// Handles `/drive/folders/<id>`, `/drive/u/0/folders/<id>` and `?id=<id>`
/// forms. Returns `None` for anything that is not a Drive URL.
pub fn drive_folder_id(reference: &str) -> Option<String> {
    let url = reqwest::Url::parse(reference.trim()).ok()?;
    if url.host_str() != Some("drive.google.com") {
        return None;
    }

    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "folders" {
            return segments
                .next()
                .filter(|id| !id.is_empty())
                .map(str::to_string);
        }
    }

    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}
