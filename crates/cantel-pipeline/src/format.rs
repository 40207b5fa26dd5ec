use crate::frame::CanFrame;

/// Renders a frame into the wire line:
/// `car<C>:<ms-since-epoch>#<8-hex-id>#<16-hex-data>\n`
pub fn format_line(car: u8, timestamp_ms: u64, frame: &CanFrame) -> String {
    let mut line = String::with_capacity(40);
    line.push_str("car");
    line.push_str(&car.to_string());
    line.push(':');
    line.push_str(&timestamp_ms.to_string());
    line.push('#');
    line.push_str(&format!("{:08x}", frame.id()));
    line.push('#');
    for byte in frame.data {
        line.push_str(&format!("{byte:02x}"));
    }
    line.push('\n');
    line
}
