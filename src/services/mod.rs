//! # Services Module
//!
//! This module contains the core business logic for the safe
//! reservation backend. Each service handles a specific concern.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `ReservationService` | Reserve/unlock orchestration, read-path normalization |
//! | `reservation_engine` | Pure per-safe state transitions |
//! | `ExpiryScheduler` | Deadline queue + automatic reclaim dispatch |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                  ReservationService                       │   │
//! │  │  • reserve_safe()  • unlock_safe()  • list_safes()        │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │            │                    │                    │           │
//! │            ▼                    ▼                    ▼           │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────┐   │
//! │  │  reservation_  │   │  StationStore  │   │    Expiry      │   │
//! │  │  engine        │   │  (CAS writes)  │   │    Scheduler   │   │
//! │  │                │   │                │   │                │   │
//! │  │ pure reserve/  │   │ read + swap    │   │ deadline heap, │   │
//! │  │ unlock/reclaim │   │ per safe       │   │ reclaim tasks  │   │
//! │  └────────────────┘   └────────────────┘   └────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod expiry_scheduler;
pub mod reservation_engine;
pub mod reservation_service;

pub use expiry_scheduler::{ExpiryDispatcher, ExpiryScheduler};
pub use reservation_service::{ReservationError, ReservationService};
