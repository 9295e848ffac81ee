//! Mesoscopic multiclass dynamic traffic assignment core: a discrete-tick
//! network loading engine with cell-transmission and point-queue link models
//! for interacting car and truck flows.

pub mod simulation;
