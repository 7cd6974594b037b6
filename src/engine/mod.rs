use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_LEAD_IN_SECONDS, TICK_INTERVAL};
use crate::countdown::{Countdown, CountdownOutcome};
use crate::question_bank::QuestionBank;
use crate::ranking_store::{now_iso, Ranking, RankingStore, RankingUpdate};
use crate::registry::ConnectionRegistry;
use crate::server_protocol::{RunStatus, RunSummaryEntry, ServerMessage};
use crate::server_utils::{format_results, format_scoreboard};
use crate::types::{Answer, Question, ScoreTier, TestConfiguration, TierCounts};

mod scoring;
mod shuffle;

use self::scoring::{fold_tiers, is_correct, stop_penalty};
use self::shuffle::{pick_questions, shuffle_options};

const EVERYONE_ANSWERED: &str = "[•] Everyone has answered, moving on.";

#[derive(Clone, Debug)]
pub struct TestEngineOptions {
    pub lead_in_seconds: u64,
    pub tick_interval: Duration,
}

impl Default for TestEngineOptions {
    fn default() -> Self {
        Self {
            lead_in_seconds: DEFAULT_LEAD_IN_SECONDS,
            tick_interval: TICK_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopOrigin {
    Engine,
    Participant(String),
}

#[derive(Debug, Default)]
struct TestRun {
    questions: Vec<Question>,
    current: Option<usize>,
    accepting: bool,
    first_credited: bool,
    scores: BTreeMap<String, ScoreTier>,
    results: BTreeMap<String, i64>,
    tallies: BTreeMap<String, TierCounts>,
    // Latest arrival (true) or departure (false) since the last roster reset.
    presence: BTreeMap<String, bool>,
    stop: Option<StopOrigin>,
}

impl TestRun {
    fn all_answered(&self) -> bool {
        !self.scores.is_empty()
            && self
                .scores
                .values()
                .all(|tier| *tier != ScoreTier::Unanswered)
    }

    fn reset_roster(&mut self, connected: Vec<String>) {
        let presence = std::mem::take(&mut self.presence);
        let mut roster: BTreeMap<String, ScoreTier> = connected
            .into_iter()
            .map(|name| (name, ScoreTier::Unanswered))
            .collect();
        for (name, present) in presence {
            if present {
                roster.entry(name).or_insert(ScoreTier::Unanswered);
            } else {
                roster.remove(&name);
            }
        }
        self.scores = roster;
    }

    fn unanswered_except(&self, name: &str) -> Vec<String> {
        self.scores
            .iter()
            .filter(|(other, tier)| **tier == ScoreTier::Unanswered && other.as_str() != name)
            .map(|(other, _)| other.clone())
            .collect()
    }
}

// Never calls into the registry while holding `state`.
pub struct TestEngine {
    requester: String,
    config: TestConfiguration,
    registry: Arc<ConnectionRegistry>,
    ranking: Arc<Mutex<RankingStore>>,
    bank: Arc<dyn QuestionBank>,
    options: TestEngineOptions,
    cancel: CancellationToken,
    countdown: Countdown,
    started_at: String,
    state: Mutex<TestRun>,
}

impl TestEngine {
    pub fn new(
        requester: impl Into<String>,
        config: TestConfiguration,
        registry: Arc<ConnectionRegistry>,
        ranking: Arc<Mutex<RankingStore>>,
        bank: Arc<dyn QuestionBank>,
        options: TestEngineOptions,
    ) -> Self {
        let cancel = CancellationToken::new();
        let countdown = Countdown::new(options.tick_interval, cancel.clone());
        Self {
            requester: requester.into(),
            config,
            registry,
            ranking,
            bank,
            options,
            cancel,
            countdown,
            started_at: now_iso(),
            state: Mutex::new(TestRun::default()),
        }
    }

    pub async fn run(&self) -> Option<RankingUpdate> {
        tracing::info!(requester = %self.requester, config = %self.config.summary(), "test run requested");
        self.registry
            .broadcast(
                &ServerMessage::RunRequested {
                    requester: self.requester.clone(),
                    config: self.config.clone(),
                },
                &[],
            )
            .await;
        self.broadcast_notice(format!(
            "[•] @{} requested a test {}. Preparing questions...",
            self.requester,
            self.config.summary()
        ))
        .await;

        let questions = self.select_questions().await;
        if questions.is_empty() {
            tracing::info!(topic = %self.config.topic, "no questions matched, run ended");
            self.broadcast_notice("[•] No questions match this configuration.")
                .await;
            self.registry
                .broadcast(&ServerMessage::RunEnded { ranking: None }, &[])
                .await;
            return None;
        }
        let total = questions.len();
        self.state.lock().await.questions = questions;

        self.broadcast_notice(format!(
            "[•] The test has {total} questions and starts in {} seconds.",
            self.options.lead_in_seconds
        ))
        .await;
        self.countdown.arm(self.options.lead_in_seconds);
        if self.countdown.run(&self.registry).await != CountdownOutcome::Cancelled {
            self.broadcast_notice("[•] Start!").await;
            for index in 0..total {
                self.ask_question(index, total).await;
                if self.cancel.is_cancelled() {
                    break;
                }
            }
        }

        self.finish(total).await
    }

    async fn select_questions(&self) -> Vec<Question> {
        let bank = self.bank.clone();
        let TestConfiguration {
            topic, level, kinds, ..
        } = self.config.clone();
        let selected =
            tokio::task::spawn_blocking(move || bank.select(&topic, level, &kinds)).await;
        let candidates = match selected {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(error)) => {
                tracing::warn!(%error, "question selection failed");
                Vec::new()
            }
            Err(error) => {
                tracing::warn!(%error, "question selection task failed");
                Vec::new()
            }
        };
        pick_questions(candidates, self.config.question_count, &mut rand::rng())
    }

    async fn ask_question(&self, index: usize, total: usize) {
        let ordinal = index + 1;
        let connected = self.registry.list().await;

        let view = {
            let mut state = self.state.lock().await;
            if state.stop.is_some() || self.cancel.is_cancelled() {
                return;
            }
            let mut question = state.questions[index].clone();
            shuffle_options(&mut question, &mut rand::rng());
            let view = question.view(ordinal, total);
            state.questions[index] = question;
            state.current = Some(index);
            state.accepting = true;
            state.first_credited = false;
            state.reset_roster(connected);
            self.countdown.arm(self.config.time_limit_seconds);
            view
        };
        self.registry
            .broadcast(&ServerMessage::Question(view), &[])
            .await;

        let outcome = self.countdown.run(&self.registry).await;
        tracing::debug!(ordinal, ?outcome, "question closed");

        let (scores, unanswered) = {
            let mut state = self.state.lock().await;
            state.accepting = false;
            let scores = std::mem::take(&mut state.scores);
            let TestRun {
                results, tallies, ..
            } = &mut *state;
            fold_tiers(&scores, results, tallies);
            let unanswered: Vec<String> = scores
                .iter()
                .filter(|(_, tier)| **tier == ScoreTier::Unanswered)
                .map(|(name, _)| name.clone())
                .collect();
            (scores, unanswered)
        };

        self.registry
            .broadcast(
                &ServerMessage::Scoreboard {
                    ordinal,
                    scores: scores
                        .iter()
                        .map(|(name, tier)| (name.clone(), tier.points()))
                        .collect(),
                    text: format_scoreboard(&scores),
                },
                &[],
            )
            .await;
        self.registry
            .send_to_each(&unanswered, &ServerMessage::outcome(ScoreTier::Unanswered))
            .await;
    }

    async fn finish(&self, total: usize) -> Option<RankingUpdate> {
        let (stop, asked, penalized, results, tallies) = {
            let mut state = self.state.lock().await;
            let stop = state.stop.clone();
            let asked = state.current.is_some();
            let mut penalized = None;
            if let (Some(StopOrigin::Participant(name)), Some(index)) = (&stop, state.current) {
                let penalty = stop_penalty(total, index + 1);
                *state.results.entry(name.clone()).or_insert(0) -= penalty;
                tracing::info!(participant = %name, penalty, "stop penalty applied");
                penalized = Some((name.clone(), penalty));
            }
            (stop, asked, penalized, state.results.clone(), state.tallies.clone())
        };

        if let Some((name, penalty)) = penalized {
            self.broadcast_notice(format!(
                "[•] @{name} was penalized {penalty} points for stopping the test."
            ))
            .await;
        }

        if stop == Some(StopOrigin::Engine) {
            tracing::info!("test run abandoned, ranking unchanged");
            self.registry
                .broadcast(&ServerMessage::RunEnded { ranking: None }, &[])
                .await;
            return None;
        }
        if !asked {
            tracing::info!("test run stopped before the first question");
            let ranking = self.ranking_snapshot().await;
            self.registry
                .broadcast(&ServerMessage::RunEnded { ranking: Some(ranking) }, &[])
                .await;
            return None;
        }

        let connected = self.registry.list().await;
        let update = self
            .ranking
            .lock()
            .await
            .apply(&results, &connected, &self.started_at);
        tracing::info!(participants = results.len(), "test run ranked");

        let entries = results
            .iter()
            .map(|(name, points)| RunSummaryEntry {
                name: name.clone(),
                run_points: *points,
                earned: update.earned(name),
                tiers: tallies.get(name).copied().unwrap_or_default(),
            })
            .collect();
        self.registry
            .broadcast(&ServerMessage::RunSummary { entries }, &[])
            .await;
        self.broadcast_notice(format_results(&results)).await;
        self.registry
            .broadcast(
                &ServerMessage::RunEnded {
                    ranking: Some(update.current.clone()),
                },
                &[],
            )
            .await;
        Some(update)
    }

    pub async fn submit_answer(&self, name: &str, answer: &Answer) -> Option<ScoreTier> {
        let (tier, all_answered) = {
            let mut state = self.state.lock().await;
            let index = state.current.filter(|_| state.accepting)?;
            if answer.ordinal != index + 1 {
                tracing::debug!(participant = %name, ordinal = answer.ordinal, "stale answer ignored");
                return None;
            }
            if state.scores.get(name) != Some(&ScoreTier::Unanswered) {
                tracing::debug!(participant = %name, "repeated or unexpected answer ignored");
                return None;
            }
            let tier = if !is_correct(&state.questions[index], answer) {
                ScoreTier::Incorrect
            } else if state.first_credited {
                ScoreTier::Correct
            } else {
                state.first_credited = true;
                ScoreTier::FirstCorrect
            };
            state.scores.insert(name.to_string(), tier);
            let all_answered = state.all_answered();
            if all_answered {
                self.countdown.finish();
            }
            (tier, all_answered)
        };

        self.registry
            .send_to(name, &ServerMessage::outcome(tier))
            .await;
        if tier == ScoreTier::FirstCorrect {
            self.registry
                .broadcast(
                    &ServerMessage::notice(format!("[•] @{name} was the first to answer correctly.")),
                    &[name],
                )
                .await;
        }
        if all_answered {
            tracing::debug!("every participant answered, closing question early");
            self.broadcast_notice(EVERYONE_ANSWERED).await;
        }
        Some(tier)
    }

    pub async fn pause(&self, by: &str) -> bool {
        if !self.countdown.set_paused(true) {
            return false;
        }
        let waiting = self.state.lock().await.unanswered_except(by);
        self.registry
            .send_to_each(&waiting, &ServerMessage::Paused { by: by.to_string() })
            .await;
        true
    }

    pub async fn resume(&self, by: &str) -> bool {
        if !self.countdown.set_paused(false) {
            return false;
        }
        let waiting = self.state.lock().await.unanswered_except(by);
        self.registry
            .send_to_each(&waiting, &ServerMessage::Resumed { by: by.to_string() })
            .await;
        true
    }

    pub fn extend_time(&self, seconds: u64) {
        self.countdown.extend(seconds);
    }

    pub async fn stop(&self, origin: StopOrigin) {
        let mut state = self.state.lock().await;
        if state.stop.is_none() {
            tracing::info!(?origin, "test run stopping");
            state.stop = Some(origin);
        }
        self.cancel.cancel();
    }

    pub async fn onboard(&self, name: &str) -> RunStatus {
        let mut state = self.state.lock().await;
        state.presence.insert(name.to_string(), true);
        let open = state.current.filter(|_| state.accepting);
        let (question, tier) = match open {
            Some(index) => {
                let tier = *state
                    .scores
                    .entry(name.to_string())
                    .or_insert(ScoreTier::Unanswered);
                let view = state.questions[index].view(index + 1, state.questions.len());
                (Some(view), Some(tier))
            }
            None => (None, None),
        };
        RunStatus {
            active: true,
            config: Some(self.config.clone()),
            question,
            tier,
            paused: self.countdown.is_paused(),
        }
    }

    // Called after `name` is deregistered. An answer already given still
    // counts for the in-flight question.
    pub async fn participant_left(&self, name: &str) {
        let all_answered = {
            let mut state = self.state.lock().await;
            state.presence.insert(name.to_string(), false);
            let dropped = state.scores.get(name) == Some(&ScoreTier::Unanswered);
            if dropped {
                state.scores.remove(name);
            }
            let all_answered = dropped && state.accepting && state.all_answered();
            if all_answered {
                self.countdown.finish();
            }
            all_answered
        };
        if all_answered {
            self.broadcast_notice(EVERYONE_ANSWERED).await;
        }
    }

    async fn ranking_snapshot(&self) -> Ranking {
        self.ranking.lock().await.snapshot()
    }

    async fn broadcast_notice(&self, text: impl Into<String>) {
        self.registry
            .broadcast(&ServerMessage::notice(text), &[])
            .await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::question_bank::InMemoryQuestionBank;
    use crate::registry::{OutboundMessage, SessionHandle};
    use crate::types::{Level, QuestionKind};

    fn single(text: &str, answer: &str) -> Question {
        Question {
            id: 0,
            text: text.to_string(),
            topic: "Maths".to_string(),
            level: Level::Normal,
            kind: QuestionKind::Single,
            media: None,
            options: vec!["1".to_string(), "2".to_string(), "4".to_string()],
            option_values: Vec::new(),
            answers: vec![answer.to_string()],
            shuffle_options: true,
        }
    }

    fn config(count: usize) -> TestConfiguration {
        TestConfiguration {
            topic: "Maths".to_string(),
            level: Level::Normal,
            kinds: vec![QuestionKind::Single],
            question_count: count,
            time_limit_seconds: 30,
        }
    }

    async fn engine_with(
        names: &[&str],
        questions: Vec<Question>,
    ) -> (Arc<TestEngine>, Vec<mpsc::Receiver<OutboundMessage>>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        for name in names {
            let (tx, rx) = mpsc::channel(512);
            registry
                .register(SessionHandle::new(*name, tx))
                .await
                .expect("register");
            receivers.push(rx);
        }
        let engine = TestEngine::new(
            names[0],
            config(questions.len()),
            registry,
            Arc::new(Mutex::new(RankingStore::new())),
            Arc::new(InMemoryQuestionBank::with_questions(questions)),
            TestEngineOptions {
                lead_in_seconds: 2,
                tick_interval: Duration::from_secs(1),
            },
        );
        (Arc::new(engine), receivers)
    }

    fn answer(ordinal: usize, value: &str) -> Answer {
        Answer {
            kind: QuestionKind::Single,
            ordinal,
            values: vec![value.to_string()],
        }
    }

    async fn open_question(engine: &TestEngine) {
        while !engine.state.lock().await.accepting {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_first_correct_per_question() {
        let (engine, _rx) = engine_with(&["alice", "bob", "carol"], vec![single("2+2", "4")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;

        assert_eq!(
            engine.submit_answer("bob", &answer(1, "4")).await,
            Some(ScoreTier::FirstCorrect)
        );
        assert_eq!(
            engine.submit_answer("alice", &answer(1, "4")).await,
            Some(ScoreTier::Correct)
        );
        assert_eq!(
            engine.submit_answer("carol", &answer(1, "1")).await,
            Some(ScoreTier::Incorrect)
        );

        let update = runner.await.expect("join").expect("ranked");
        assert_eq!(update.current.points_of("bob"), 2);
        assert_eq!(update.current.points_of("alice"), 1);
        assert_eq!(update.current.points_of("carol"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_and_repeated_answers_are_ignored() {
        let (engine, _rx) = engine_with(&["alice", "bob"], vec![single("2+2", "4")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        assert_eq!(engine.submit_answer("alice", &answer(1, "4")).await, None);
        open_question(&engine).await;

        assert_eq!(engine.submit_answer("alice", &answer(2, "4")).await, None);
        assert_eq!(
            engine.submit_answer("alice", &answer(1, "1")).await,
            Some(ScoreTier::Incorrect)
        );
        assert_eq!(engine.submit_answer("alice", &answer(1, "4")).await, None);

        engine.stop(StopOrigin::Engine).await;
        assert!(runner.await.expect("join").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_is_seeded_and_sees_current_question() {
        let (engine, _rx) = engine_with(&["alice"], vec![single("2+2", "4")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;

        let status = engine.onboard("dave").await;
        assert!(status.active);
        assert_eq!(status.question.map(|view| view.ordinal), Some(1));
        assert_eq!(
            engine.state.lock().await.scores.get("dave"),
            Some(&ScoreTier::Unanswered)
        );

        engine.participant_left("dave").await;
        assert!(!engine.state.lock().await.scores.contains_key("dave"));
        engine.stop(StopOrigin::Engine).await;
        runner.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_correct_answers_credit_exactly_one_first() {
        let names = ["alice", "bob", "carol", "dave", "erin", "frank"];
        let (engine, _rx) = engine_with(&names, vec![single("2+2", "4")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;

        let submissions: Vec<_> = names
            .iter()
            .map(|name| {
                let engine = engine.clone();
                let name = name.to_string();
                tokio::spawn(async move { engine.submit_answer(&name, &answer(1, "4")).await })
            })
            .collect();
        let mut tiers = Vec::new();
        for submission in submissions {
            tiers.push(submission.await.expect("join").expect("scored"));
        }

        let firsts = tiers.iter().filter(|tier| **tier == ScoreTier::FirstCorrect).count();
        let seconds = tiers.iter().filter(|tier| **tier == ScoreTier::Correct).count();
        assert_eq!(firsts, 1);
        assert_eq!(seconds, names.len() - 1);
        let update = runner.await.expect("join").expect("ranked");
        let total: i64 = names.iter().map(|name| update.current.points_of(name)).sum();
        assert_eq!(total, 2 + (names.len() as i64 - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn departure_keeps_an_answer_already_given() {
        let (engine, _rx) = engine_with(&["alice", "bob"], vec![single("2+2", "4")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;

        assert_eq!(
            engine.submit_answer("bob", &answer(1, "4")).await,
            Some(ScoreTier::FirstCorrect)
        );
        engine.registry.deregister("bob").await;
        engine.participant_left("bob").await;

        let update = runner.await.expect("join").expect("ranked");
        assert_eq!(update.current.points_of("bob"), 2);
        assert_eq!(update.current.points_of("alice"), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejoining_does_not_reopen_an_answered_question() {
        let (engine, _rx) = engine_with(&["alice", "bob"], vec![single("2+2", "4")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;

        assert_eq!(
            engine.submit_answer("bob", &answer(1, "1")).await,
            Some(ScoreTier::Incorrect)
        );
        engine.participant_left("bob").await;
        let status = engine.onboard("bob").await;
        assert_eq!(status.tier, Some(ScoreTier::Incorrect));
        assert_eq!(engine.submit_answer("bob", &answer(1, "4")).await, None);

        engine.stop(StopOrigin::Engine).await;
        runner.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn early_close_does_not_cut_the_next_question_short() {
        let (engine, _rx) = engine_with(&["alice"], vec![single("2+2", "4"), single("1+1", "2")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;
        engine.submit_answer("alice", &answer(1, "4")).await;

        while engine.state.lock().await.current != Some(1) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(engine.state.lock().await.accepting);

        engine.stop(StopOrigin::Engine).await;
        runner.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_between_questions_asks_nothing_more() {
        let (engine, _rx) = engine_with(&["alice"], vec![single("2+2", "4"), single("1+1", "2")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;
        engine.stop(StopOrigin::Participant("alice".to_string())).await;

        let update = runner.await.expect("join").expect("ranked");
        assert_eq!(engine.state.lock().await.current, Some(0));
        // -1 for the cut-short first question, -2 for stopping at 1 of 2.
        assert_eq!(update.current.points_of("alice"), -3);
    }

    #[test]
    fn roster_reset_applies_arrivals_and_departures() {
        let mut run = TestRun::default();
        run.presence.insert("carol".to_string(), true);
        run.presence.insert("bob".to_string(), false);
        run.reset_roster(vec!["alice".to_string(), "bob".to_string()]);

        let seeded: Vec<_> = run.scores.keys().cloned().collect();
        assert_eq!(seeded, vec!["alice", "carol"]);
        assert!(run.presence.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_notifies_only_other_unanswered_participants() {
        let (engine, mut rx) = engine_with(&["alice", "bob", "carol"], vec![single("2+2", "4")]).await;
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        open_question(&engine).await;
        engine.submit_answer("carol", &answer(1, "4")).await;
        for receiver in rx.iter_mut() {
            while receiver.try_recv().is_ok() {}
        }

        assert!(engine.pause("alice").await);
        assert!(!engine.pause("alice").await);

        let kinds = |receiver: &mut mpsc::Receiver<OutboundMessage>| {
            let mut kinds = Vec::new();
            while let Ok(OutboundMessage::Text(text)) = receiver.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                kinds.push(value["kind"].as_str().unwrap_or_default().to_string());
            }
            kinds
        };
        assert!(!kinds(&mut rx[0]).contains(&"paused".to_string()));
        assert!(kinds(&mut rx[1]).contains(&"paused".to_string()));
        assert!(!kinds(&mut rx[2]).contains(&"paused".to_string()));

        engine.stop(StopOrigin::Engine).await;
        runner.await.expect("join");
    }
}
