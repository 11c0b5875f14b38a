use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

/// The waiting reason we act on. The earlier `ErrImagePull` state is
/// deliberately ignored: kubelet often recovers from it on its own, and
/// surfacing it would page people for pulls that succeed seconds later.
pub const IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Init,
    Main,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Init => "INIT",
            ContainerType::Main => "MAIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePullError {
    pub container_name: String,
    pub container_type: ContainerType,
    pub image: Option<String>,
    pub reason: String,
    pub message: Option<String>,
}

/// Post-hoc scan of a pod for actionable image-pull failures, covering both
/// init and main containers.
pub fn check_image_pull_errors(pod: &Pod) -> Vec<ImagePullError> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };

    let init = status
        .init_container_statuses
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|s| (ContainerType::Init, s));
    let main = status
        .container_statuses
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|s| (ContainerType::Main, s));

    init.chain(main)
        .filter_map(|(container_type, s)| image_pull_error(container_type, s))
        .collect()
}

fn image_pull_error(
    container_type: ContainerType,
    status: &ContainerStatus,
) -> Option<ImagePullError> {
    let waiting = status.state.as_ref()?.waiting.as_ref()?;
    if waiting.reason.as_deref() != Some(IMAGE_PULL_BACK_OFF) {
        return None;
    }

    Some(ImagePullError {
        container_name: status.name.clone(),
        container_type,
        image: Some(status.image.clone()).filter(|i| !i.is_empty()),
        reason: IMAGE_PULL_BACK_OFF.to_string(),
        message: waiting.message.clone(),
    })
}

/// Render matches into one operator-facing line, `"; "`-separated. Falls
/// back to the container name when the image reference is absent.
pub fn format_image_pull_errors(errors: &[ImagePullError]) -> String {
    errors
        .iter()
        .map(|e| {
            let detail = e.message.as_deref().unwrap_or(&e.reason);
            match &e.image {
                Some(image) => format!("failed to pull image {image}: {detail}"),
                None => format!(
                    "failed to pull image for container {}: {detail}",
                    e.container_name
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, PodStatus};

    fn waiting_status(name: &str, image: &str, reason: &str, message: Option<&str>) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            image: image.to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    message: message.map(str::to_string),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(init: Vec<ContainerStatus>, main: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                init_container_statuses: Some(init),
                container_statuses: Some(main),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn err_image_pull_is_ignored() {
        let p = pod(
            vec![],
            vec![waiting_status("main", "img:1", "ErrImagePull", None)],
        );
        assert!(check_image_pull_errors(&p).is_empty());
    }

    #[test]
    fn backoff_in_an_init_container_yields_one_init_error() {
        let p = pod(
            vec![waiting_status(
                "init-config",
                "img:2",
                IMAGE_PULL_BACK_OFF,
                Some("Back-off pulling image"),
            )],
            vec![],
        );

        let errors = check_image_pull_errors(&p);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].container_type, ContainerType::Init);
        assert_eq!(errors[0].container_name, "init-config");
        assert_eq!(errors[0].image.as_deref(), Some("img:2"));
    }

    #[test]
    fn both_container_kinds_are_scanned() {
        let p = pod(
            vec![waiting_status("init", "a:1", IMAGE_PULL_BACK_OFF, None)],
            vec![waiting_status("main", "b:2", IMAGE_PULL_BACK_OFF, None)],
        );

        let errors = check_image_pull_errors(&p);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].container_type, ContainerType::Init);
        assert_eq!(errors[1].container_type, ContainerType::Main);
    }

    #[test]
    fn formatting_joins_with_semicolons_and_falls_back_to_container_name() {
        let errors = vec![
            ImagePullError {
                container_name: "main".into(),
                container_type: ContainerType::Main,
                image: Some("img:3".into()),
                reason: IMAGE_PULL_BACK_OFF.into(),
                message: Some("no such image".into()),
            },
            ImagePullError {
                container_name: "init-config".into(),
                container_type: ContainerType::Init,
                image: None,
                reason: IMAGE_PULL_BACK_OFF.into(),
                message: None,
            },
        ];

        let rendered = format_image_pull_errors(&errors);
        assert_eq!(
            rendered,
            "failed to pull image img:3: no such image; \
             failed to pull image for container init-config: ImagePullBackOff"
        );
    }

    #[test]
    fn pod_without_status_yields_nothing() {
        assert!(check_image_pull_errors(&Pod::default()).is_empty());
    }
}
