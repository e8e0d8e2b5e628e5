/// This module contains the code-phase/Doppler search that decides whether a satellite's ranging code is present
pub mod acquisition;

/// This module contains the spectral monitor that flags sustained wideband interference
pub mod jamming;
