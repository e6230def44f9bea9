//! ---
//! netorch_section: "02-compute-backends"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Compute node handles and REST transports."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
//! Paths of the compute REST API, relative to the API root.

/// Health-check endpoint.
pub const VERSION: &str = "/version";

/// `/projects/{project}/{type}/vms`
pub fn device_collection(project_id: &str, device_type: &str) -> String {
    format!("/projects/{}/{}/vms", project_id, device_type)
}

/// `/projects/{project}/{type}/vms/{id}`
pub fn device(project_id: &str, device_type: &str, device_id: &str) -> String {
    format!("{}/{}", device_collection(project_id, device_type), device_id)
}

/// `/projects/{project}/{type}/vms/{id}/{action}`
pub fn device_action(project_id: &str, device_type: &str, device_id: &str, action: &str) -> String {
    format!("{}/{}", device(project_id, device_type, device_id), action)
}

/// `/projects/{project}/{type}/vms/{id}/adapters/{adapter}/ports/{port}/nio`
pub fn nio(
    project_id: &str,
    device_type: &str,
    device_id: &str,
    adapter_number: u32,
    port_number: u32,
) -> String {
    format!(
        "{}/adapters/{}/ports/{}/nio",
        device(project_id, device_type, device_id),
        adapter_number,
        port_number
    )
}
