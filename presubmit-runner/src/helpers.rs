// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use url::Url;

/// Returns `base` with `segments` appended to its path, each percent-encoded as one segment.
///
/// A trailing slash on `base` is dropped first. Pass `""` as the last segment to end the path
/// with a slash.
pub(crate) fn join_segments<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Url {
    let mut url = base.clone();
    // Config URLs are rejected at load time unless they can be a base.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Appends `params` to `url`'s query string, form-encoded.
pub(crate) fn with_query<'a>(
    mut url: Url,
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Url {
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    url
}

/// Removes the `-slave` suffix convention from an executor label for display.
pub(crate) fn short_executor_label(label: &str) -> String {
    label.replace("-slave", "")
}
