//! Built-in configuration defaults, overlaid by the project's `config.json`.

use serde_json::{json, Map, Value};

pub const LOCAL_PROJECT_NAME: &str = "LOCAL_PROJECT_NAME";
pub const DEV_PROJECT_NAME: &str = "DEV_PROJECT_NAME";
pub const K8S_NAMESPACE: &str = "K8S_NAMESPACE";
pub const ID: &str = "ID";
pub const RUN_MYSQL: &str = "RUN_MYSQL";
pub const RUN_MONGODB: &str = "RUN_MONGODB";
pub const MYSQL_ROOT_USERNAME: &str = "MYSQL_ROOT_USERNAME";
pub const K8S_READY_TIMEOUT_SECONDS: &str = "K8S_READY_TIMEOUT_SECONDS";
pub const K8S_POLL_INTERVAL_SECONDS: &str = "K8S_POLL_INTERVAL_SECONDS";
pub const K8S_JOB_TIMEOUT_SECONDS: &str = "K8S_JOB_TIMEOUT_SECONDS";

pub fn values() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(LOCAL_PROJECT_NAME.into(), json!("berth_local"));
    map.insert(DEV_PROJECT_NAME.into(), json!("berth_dev"));
    map.insert(K8S_NAMESPACE.into(), json!("openedx"));
    map.insert(ID.into(), json!("default"));
    map.insert(RUN_MYSQL.into(), json!(true));
    map.insert(RUN_MONGODB.into(), json!(true));
    map.insert(MYSQL_ROOT_USERNAME.into(), json!("root"));
    map.insert(K8S_READY_TIMEOUT_SECONDS.into(), json!(600));
    map.insert(K8S_POLL_INTERVAL_SECONDS.into(), json!(1));
    map.insert(K8S_JOB_TIMEOUT_SECONDS.into(), json!(3600));
    map
}
