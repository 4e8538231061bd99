use std::fmt;

/// SEMS Portal account used to read one plant.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account: String,
    pub password: String,
    pub plant_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"***")
            .field("plant_id", &self.plant_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_password() {
        let c = Credentials {
            account: "visitor@example.com".to_string(),
            password: "hunter2".to_string(),
            plant_id: "plant-1".to_string(),
        };

        let dbg = format!("{c:?}");
        assert!(dbg.contains("visitor@example.com"));
        assert!(!dbg.contains("hunter2"));
    }
}
