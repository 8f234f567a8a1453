//! Daily crop-status digests for farm subscribers.
//!
//! A [`reconcile::Reconciler`] keeps one daily timer per subject in line with
//! the notification times stored in the database. Each firing goes through
//! [`dispatch::Dispatcher`], which runs a [`pipeline::DispatchPipeline`]:
//! load readings, compose, generate, translate, deliver, record.

pub mod compose;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod readings;
pub mod reconcile;
pub mod schedule;
pub mod store;
pub mod timer;
pub mod whatsapp;
