/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three command modules:

- `auth`  — register, login, logout and whoami
- `chats` — one-shot conversation commands (list, create, search, history, send)
- `chat`  — interactive view that follows a conversation live

Every handler takes a ready [`SyncEngine`](crate::sync::SyncEngine); the
entrypoint builds it from configuration and the restored session.
*/

pub mod auth;
pub mod chat;
pub mod chats;
