// Author: Quayside contributors
// License: MIT

pub mod colour;
pub mod compositor;
pub mod freedesktop;
pub mod login;
pub mod network;
pub mod prompt_broker;
