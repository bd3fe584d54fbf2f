use crate::filename::METADATA_NAME;
use crate::types::DownloadAllowed;

/// URL and filename deny-lists. Both match by substring.
#[derive(Clone, Debug, Default)]
pub struct Policy {
    pub filtered_domains: Vec<String>,
    /// `None` disables filename filtering entirely.
    pub filtered_filenames: Option<Vec<String>>,
}

impl Policy {
    pub fn is_url_allowed(&self, url: &str) -> bool {
        !self.filtered_domains.iter().any(|d| !d.is_empty() && url.contains(d.as_str()))
    }

    /// `Unknown` when the name is still the metadata placeholder.
    pub fn check_filename(&self, filename: &str) -> DownloadAllowed {
        let Some(filtered) = &self.filtered_filenames else {
            return DownloadAllowed::Allowed;
        };
        if filename == METADATA_NAME {
            return DownloadAllowed::Unknown;
        }
        if filtered.iter().any(|f| !f.is_empty() && filename.contains(f.as_str())) {
            DownloadAllowed::Disallowed
        } else {
            DownloadAllowed::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_deny_list() {
        let p = Policy { filtered_domains: vec!["bad.example".into()], filtered_filenames: None };
        assert!(!p.is_url_allowed("https://bad.example/x"));
        assert!(p.is_url_allowed("https://good.example/x"));
    }

    #[test]
    fn filename_deny_list() {
        let p = Policy { filtered_domains: vec![], filtered_filenames: Some(vec!["sample".into()]) };
        assert_eq!(p.check_filename("a.sample.mkv"), DownloadAllowed::Disallowed);
        assert_eq!(p.check_filename("movie.mkv"), DownloadAllowed::Allowed);
        assert_eq!(p.check_filename(METADATA_NAME), DownloadAllowed::Unknown);
    }

    #[test]
    fn filename_filter_off_allows_everything() {
        let p = Policy::default();
        assert_eq!(p.check_filename(METADATA_NAME), DownloadAllowed::Allowed);
    }
}
