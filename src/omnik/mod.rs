//! Omnik (and Trannergy/Solarman-logger based) inverter protocol: the request
//! frame, the fixed-offset response layout and the TCP exchange.
pub mod field;
pub mod inverter;
pub mod packet;
