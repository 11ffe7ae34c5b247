//! Hash map used by every bundlekit registry.
//!
//! Registry keys are short bundle and asset paths, hashed on every lookup,
//! so the maps use AHash instead of SipHash.

pub use ahash::AHashMap as HashMap;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashmap_bundle_keys() {
        let mut map = HashMap::new();
        map.insert("ui/uiloginview.b".to_string(), 1usize);
        assert_eq!(map.get("ui/uiloginview.b"), Some(&1));
        assert_eq!(map.get("ui/other.b"), None);
    }

    #[test]
    fn test_std_map_api_available() {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        map.entry("ui/login.b".to_string())
            .or_default()
            .push("ui/common.b".to_string());
        assert_eq!(map["ui/login.b"], vec!["ui/common.b".to_string()]);
        assert!(std::mem::take(&mut map).len() == 1 && map.is_empty());
    }
}
