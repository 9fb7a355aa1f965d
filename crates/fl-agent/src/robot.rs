//! Stand-in robot for running an agent without robot hardware.
//!
//! Navigation takes a fixed amount of time and always succeeds, parameters
//! are kept in memory, and rosbags are whatever `.bag` files sit in the
//! configured directory.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use fl_protocol::{NavigationGoal, ProcessCommand, RosbagCommand, VelocityCommand};

use crate::dispatch::{Notice, RobotHandler};

/// Keys the coordinator adds for routing; not robot parameters.
const ROUTING_KEYS: [&str; 2] = ["sender", "command_id"];

pub struct SimulatedRobot {
    navigation_time: Duration,
    rosbag_dir: Option<PathBuf>,
    params: Mutex<Map<String, Value>>,
}

impl SimulatedRobot {
    pub fn new(rosbag_dir: Option<PathBuf>, params: Map<String, Value>) -> Self {
        Self {
            navigation_time: Duration::from_secs(1),
            rosbag_dir,
            params: Mutex::new(params),
        }
    }

    pub fn with_navigation_time(mut self, navigation_time: Duration) -> Self {
        self.navigation_time = navigation_time;
        self
    }

    pub fn params(&self) -> Map<String, Value> {
        self.params
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RobotHandler for SimulatedRobot {
    async fn navigate(&self, goal: &NavigationGoal) -> bool {
        tracing::info!(x = goal.x, y = goal.y, th = goal.th, "Navigating");
        tokio::time::sleep(self.navigation_time).await;
        true
    }

    async fn set_velocity(&self, velocity: &VelocityCommand) {
        tracing::info!(
            linear_x = velocity.linear_x,
            linear_y = velocity.linear_y,
            angular_z = velocity.angular_z,
            "Velocity set"
        );
    }

    async fn update_params(&self, params: Map<String, Value>) -> Map<String, Value> {
        if let Ok(mut current) = self.params.lock() {
            for (key, value) in &params {
                if !ROUTING_KEYS.contains(&key.as_str()) {
                    current.insert(key.clone(), value.clone());
                }
            }
        }
        tracing::info!(count = params.len(), "Parameters updated");
        params
    }

    async fn graph(&self, payload: &Map<String, Value>) {
        tracing::info!(keys = ?payload.keys().collect::<Vec<_>>(), "Graph command received");
    }

    async fn list_rosbags(&self) -> Vec<String> {
        let Some(dir) = &self.rosbag_dir else {
            return Vec::new();
        };

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot list rosbag directory");
                return Vec::new();
            }
        };

        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.ends_with(".bag") {
                        names.push(name);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Rosbag listing interrupted");
                    break;
                }
            }
        }
        names.sort();
        names
    }

    async fn rosbag(&self, command: &RosbagCommand) {
        tracing::info!(kind = %command.kind, "Rosbag command received");
    }

    async fn pictures(&self, _payload: &Map<String, Value>) -> Notice {
        Notice::info("Received all the patrol pictures")
    }

    async fn process(&self, command: &ProcessCommand) -> Notice {
        tracing::info!(systemctl = %command.systemctl, "Process command received");
        Notice::info(format!("Process '{}' executed", command.systemctl))
    }
}
