use netvault_domain::entities::{Device, Schedule};

/// Builder for test devices with sensible defaults.
pub struct DeviceBuilder {
    device: Device,
}

impl DeviceBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            device: Device {
                id,
                name: format!("device-{id}"),
                address: format!("10.0.0.{id}"),
                backup_method: "noop".to_string(),
                credential: Some(serde_json::json!({"username": "backup"})),
                collection_group: None,
                storage_backend: "fs".to_string(),
                storage_location: "core".to_string(),
                retention_policy: None,
                enabled: true,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.device.name = name.to_string();
        self
    }

    pub fn backup_method(mut self, method: &str) -> Self {
        self.device.backup_method = method.to_string();
        self
    }

    pub fn collection_group(mut self, group: &str) -> Self {
        self.device.collection_group = Some(group.to_string());
        self
    }

    pub fn storage(mut self, backend: &str, location: &str) -> Self {
        self.device.storage_backend = backend.to_string();
        self.device.storage_location = location.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.device.enabled = false;
        self
    }

    pub fn build(self) -> Device {
        self.device
    }
}

/// Builder for test schedules. Default cadence fires every second
/// so scheduler ticks in tests always find a fresh fire point.
pub struct ScheduleBuilder {
    schedule: Schedule,
}

impl ScheduleBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            schedule: Schedule {
                id,
                name: format!("schedule-{id}"),
                cadence: "* * * * * *".to_string(),
                queue: None,
                enabled: true,
                device_ids: Vec::new(),
                last_run_at: None,
            },
        }
    }

    pub fn cadence(mut self, expr: &str) -> Self {
        self.schedule.cadence = expr.to_string();
        self
    }

    pub fn queue(mut self, queue: &str) -> Self {
        self.schedule.queue = Some(queue.to_string());
        self
    }

    pub fn devices(mut self, ids: &[i64]) -> Self {
        self.schedule.device_ids = ids.to_vec();
        self
    }

    pub fn last_run(mut self, at: chrono::DateTime<chrono::Utc>) -> Self {
        self.schedule.last_run_at = Some(at);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.schedule.enabled = false;
        self
    }

    pub fn build(self) -> Schedule {
        self.schedule
    }
}
