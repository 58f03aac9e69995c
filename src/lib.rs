//! Fleetwright - a DAG-driven, multi-tenant workflow engine for bulk fleet
//! configuration.
//!
//! The engine is a library: a host application registers
//! [`domain::models::WorkflowDefinition`]s and their
//! [`domain::ports::PhaseExecutor`] implementations against a
//! [`services::WorkflowRegistry`], supplies a [`domain::ports::StateStore`]
//! and [`domain::ports::ActivityStatusSource`] wired to its own Redis
//! instance and upstream controller client, and drives jobs through a
//! [`services::Scheduler`]. `api` exposes that scheduler over HTTP.

pub mod api;
pub mod domain;
pub mod infrastructure;
pub mod services;
