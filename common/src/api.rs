use urlencoding::encode;

pub const PATH_SENSOR: &str = "/api/sensor";
pub const PATH_WS: &str = "/ws";

pub const ROUTE_TEMP_LIMITS: &str = "/api/devices/{id}/temp_limits";
pub const ROUTE_COMMANDS: &str = "/api/devices/{id}/commands";

/// The id is percent-encoded so it always lands in a single path segment.
pub fn temp_limits_path(device_id: &str) -> String {
    format!("/api/devices/{}/temp_limits", encode(device_id))
}

pub fn commands_path(device_id: &str) -> String {
    format!("/api/devices/{}/commands", encode(device_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_ids_pass_through() {
        assert_eq!(
            temp_limits_path("pico2w-1556a5"),
            "/api/devices/pico2w-1556a5/temp_limits"
        );
        assert_eq!(commands_path("box_7.a~b"), "/api/devices/box_7.a~b/commands");
    }

    #[test]
    fn reserved_characters_stay_in_one_segment() {
        assert_eq!(
            temp_limits_path("../sensor?x=1#y"),
            "/api/devices/..%2Fsensor%3Fx%3D1%23y/temp_limits"
        );
        assert_eq!(commands_path("küche 1"), "/api/devices/k%C3%BCche%201/commands");
    }
}
