// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod classify_role;
pub mod magic_function;
pub mod search_school_data;
pub mod submit_official_absence;
