//! Deployment agent DTOs

use serde::{Deserialize, Serialize};

/// Request asking the deployment agent to (re)deploy an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAppRequest {
    pub app_id: String,
    pub image: String,
    pub container_port: u16,
    pub base_path: String,
}

impl DeployAppRequest {
    /// Builds a request; `base_path` falls back to `/apps/{app_id}`
    pub fn new(
        app_id: impl Into<String>,
        image: impl Into<String>,
        container_port: u16,
        base_path: Option<&str>,
    ) -> Self {
        let app_id = app_id.into();
        let base_path = match base_path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => path.to_string(),
            None => format!("/apps/{}", app_id),
        };

        Self {
            app_id,
            image: image.into(),
            container_port,
            base_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_path() {
        let req = DeployAppRequest::new("42", "registry/app:1", 3000, None);
        assert_eq!(req.base_path, "/apps/42");

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["appId"], "42");
        assert_eq!(json["containerPort"], 3000);
    }

    #[test]
    fn test_explicit_base_path() {
        let req = DeployAppRequest::new("42", "registry/app:1", 8080, Some("/preview"));
        assert_eq!(req.base_path, "/preview");
    }
}
