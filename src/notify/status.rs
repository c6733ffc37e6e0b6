/// Minimum payload length carrying a full status frame. Longer payloads are decoded, ignoring the tail.
pub const STATUS_FRAME_LEN: usize = 34;

/// Fixed-layout status report: two single-byte codes followed by big-endian 16 bit readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub current_status: u8,
    pub error_code: u8,
    pub temperature: [u16; 4],
    pub pressure: [u16; 6],
    pub level: [u16; 2],
    pub flow_rate: [u16; 4],
}

fn u16_be(high: u8, low: u8) -> u16 {
    (u16::from(high) << 8) | u16::from(low)
}

fn pairs<const N: usize>(payload: &[u8], start: usize) -> [u16; N] {
    let mut out = [0u16; N];
    for (i, value) in out.iter_mut().enumerate() {
        *value = u16_be(payload[start + 2 * i], payload[start + 2 * i + 1]);
    }
    out
}

impl StatusFrame {
    /// `None` when the payload is too short to hold a frame.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < STATUS_FRAME_LEN {
            return None;
        }

        Some(StatusFrame {
            current_status: payload[0],
            error_code: payload[1],
            temperature: pairs(payload, 2),
            pressure: pairs(payload, 10),
            level: pairs(payload, 22),
            flow_rate: pairs(payload, 26),
        })
    }

    /// Field name and rendered value, in display order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        fn join(values: &[u16]) -> String {
            values.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
        }

        vec![
            ("current_status", self.current_status.to_string()),
            ("error_code", self.error_code.to_string()),
            ("temperature[4]", join(&self.temperature)),
            ("pressure[6]", join(&self.pressure)),
            ("level[2]", join(&self.level)),
            ("flowrate[4]", join(&self.flow_rate)),
        ]
    }
}
