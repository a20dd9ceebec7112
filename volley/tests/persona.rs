/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use volley::action::{Action, HttpRequest};
use volley::client::{ClientOptions, ClientSet};
use volley::config::{PersonaConfig, PersonaType};
use volley::persona::Persona;

mod common;
use common::{context_with, local_tcp, serve_ok};

fn config(persona_type: PersonaType) -> PersonaConfig {
    PersonaConfig {
        total_time: Duration::from_millis(300),
        batch_size: 4,
        batch_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        graceful_stop: Duration::from_millis(500),
        persona_type,
        ..Default::default()
    }
}

async fn run(config: PersonaConfig, actions: Vec<Action>) -> (volley::persona::RunOutcome, Arc<ClientSet>) {
    let (listener, addr) = local_tcp().await;
    serve_ok(listener).await;

    let ctx = context_with(&[("api.test", 80, addr)]);
    let clients = Arc::new(ClientSet::with_defaults(&ctx, ClientOptions::from(&config)));
    let persona = Persona::new(config, clients.clone(), actions);
    let outcome = persona.run().await.unwrap();
    (outcome, clients)
}

#[tokio::test]
async fn default_persona_fires_batches() {
    let actions = vec![
        Action::http("a", "http://api.test/a", HttpRequest::get()),
        Action::http("b", "http://api.test/b", HttpRequest::get()),
    ];
    let (outcome, clients) = run(config(PersonaType::Default), actions).await;

    assert!(outcome.results.len() >= 4);
    assert_eq!(outcome.results.len() % 4, 0);
    for r in &outcome.results {
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.status, Some(200));
        assert!(r.timings.is_ordered());
    }
    let http = clients.get("http").unwrap();
    assert_eq!(http.stats().task_total() as usize, outcome.results.len());
    assert!(http.stats().conn_success() <= 4);

    let summary = outcome.summary();
    assert_eq!(summary.completed as usize, outcome.results.len());
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn sequence_persona_keeps_order() {
    let actions = vec![
        Action::http("first", "http://api.test/1", HttpRequest::get()),
        Action::http("second", "http://api.test/2", HttpRequest::get()),
    ];
    let (outcome, _) = run(config(PersonaType::Sequence), actions).await;

    assert!(!outcome.results.is_empty());
    let firsts = outcome.results.iter().filter(|r| r.name == "first").count();
    let seconds = outcome.results.iter().filter(|r| r.name == "second").count();
    assert!(firsts >= seconds);
    assert!(outcome.results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn multi_user_persona_runs_every_user() {
    let actions = vec![
        Action::http("alice", "http://api.test/a", HttpRequest::get()).with_user("alice"),
        Action::http("bob", "http://api.test/b", HttpRequest::get()).with_user("bob"),
    ];
    let (outcome, _) = run(config(PersonaType::MultiUser), actions).await;

    for user in ["alice", "bob"] {
        assert!(
            outcome
                .results
                .iter()
                .any(|r| r.user.as_deref() == Some(user)),
            "no result for {user}"
        );
    }
}

#[tokio::test]
async fn stop_token_ends_the_run() {
    let (listener, addr) = local_tcp().await;
    serve_ok(listener).await;

    let mut config = config(PersonaType::Default);
    config.total_time = Duration::from_secs(30);
    let ctx = context_with(&[("api.test", 80, addr)]);
    let clients = Arc::new(ClientSet::with_defaults(&ctx, ClientOptions::from(&config)));
    let persona = Persona::new(
        config,
        clients,
        vec![Action::http("a", "http://api.test/", HttpRequest::get())],
    );

    let stop = persona.stop_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.cancel();
    });
    let started = std::time::Instant::now();
    let outcome = persona.run().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!outcome.results.is_empty());
}

#[tokio::test]
async fn unresolvable_host_fails_prepare() {
    let config = config(PersonaType::Default);
    let ctx = volley::EngineContext::default();
    let clients = Arc::new(ClientSet::with_defaults(&ctx, ClientOptions::from(&config)));
    let persona = Persona::new(
        config,
        clients,
        vec![Action::http("bad", "http://no-such-host.invalid/", HttpRequest::get())],
    );
    let e = persona.prepare().await.unwrap_err();
    assert!(matches!(e, volley::ActionError::Resolution(_)));
}
