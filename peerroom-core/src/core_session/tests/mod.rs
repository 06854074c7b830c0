//! Multi-peer scenarios run over the loopback collaborators

mod transfers;
