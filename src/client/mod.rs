// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for the payer side of the flow.

pub mod poller;

pub use poller::{ConfirmationPoller, PaymentConfirmation, PollError, PollerConfig};
