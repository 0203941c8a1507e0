use uuid::Uuid;

/// Primary service advertised by Voltra peripherals.
pub const VOLTRA_SERVICE: Uuid = Uuid::from_u128(0xe4dada34_0867_8783_9f70_2ca29216c7e4);

/// Device-to-host notification characteristic.
pub const VOLTRA_NOTIFY: Uuid = Uuid::from_u128(0x55ca1e52_7354_25de_6afc_b7df1e8816ac);

/// Host-to-device command characteristic. The device acks commands back on
/// it, so the relay subscribes to it like the notify characteristic.
pub const VOLTRA_WRITE: Uuid = Uuid::from_u128(0xa010891d_f50f_44f0_901f_9a2421a9e050);

/// Advertised-name prefix used to filter scan results.
pub const VOLTRA_NAME_PREFIX: &str = "VTR-";

/// What the relay looks for on a peripheral. Swapping the profile is how a
/// different device family would plug in; the session logic stays the same.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceProfile {
    pub service: Uuid,
    pub write_characteristic: Uuid,
    pub notify_characteristic: Uuid,
    pub name_prefix: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            service: VOLTRA_SERVICE,
            write_characteristic: VOLTRA_WRITE,
            notify_characteristic: VOLTRA_NOTIFY,
            name_prefix: VOLTRA_NAME_PREFIX.to_string(),
        }
    }
}

impl DeviceProfile {
    /// Whether an advertised name belongs to this device family.
    pub fn matches_name(&self, name: &str) -> bool {
        name.starts_with(&self.name_prefix)
    }
}
