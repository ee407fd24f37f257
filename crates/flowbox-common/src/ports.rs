//! Deterministic port allocation for flow containers.
//!
//! Every flow owns `PORTS_PER_FLOW` consecutive slots inside a window of
//! `PORT_WINDOW` ports starting at `BASE_PORT`. Slots cycle, so flows whose
//! indices coincide modulo the window share ports; operators size the window
//! so that colliding flows are never active at the same time.

/// First port of the allocation window.
pub const BASE_PORT: u16 = 28000;

/// Number of ports handed to each flow.
pub const PORTS_PER_FLOW: usize = 2;

/// Size of the cycling window.
pub const PORT_WINDOW: i64 = 2000;

/// Ports published by the primary container of `flow_id`.
///
/// `port[i] = BASE_PORT + ((flow_id * PORTS_PER_FLOW + i) mod PORT_WINDOW)`.
pub fn flow_ports(flow_id: i64) -> [u16; PORTS_PER_FLOW] {
    let mut ports = [0u16; PORTS_PER_FLOW];
    // Reduce before multiplying so huge identifiers cannot overflow.
    let base_index = flow_id.rem_euclid(PORT_WINDOW) * PORTS_PER_FLOW as i64;
    for (i, port) in ports.iter_mut().enumerate() {
        let offset = (base_index + i as i64) % PORT_WINDOW;
        *port = BASE_PORT + offset as u16;
    }
    ports
}
