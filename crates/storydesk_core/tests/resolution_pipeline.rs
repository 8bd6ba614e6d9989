use chrono::NaiveDate;
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use storydesk_core::arbiter::{
    Arbiter, ArbitrationError, ArbitrationRequest, ArbitrationVerdict, MergeContent,
};
use storydesk_core::db::open_db_in_memory;
use storydesk_core::model::article::Severity;
use storydesk_core::model::resolution::{CandidateStatus, ReasoningSource, Resolution};
use storydesk_core::repo::article_repo::{ArticleRepository, LookupPath, SqliteArticleRepository};
use storydesk_core::repo::candidate_repo::{CandidateRepository, SqliteCandidateRepository};
use storydesk_core::repo::publication_repo::{PublicationRepository, SqlitePublicationRepository};
use storydesk_core::service::classifier::SimilarityClassifier;
use storydesk_core::service::decision::{decide_from_score, DecisionAction};
use storydesk_core::service::pipeline::FailureStage;
use storydesk_core::{
    ApplyError, Candidate, CandidateBatch, CorpusIndex, PipelineError, RepoError,
    ResolutionApplier, ResolutionConfig, ResolutionPipeline, Thresholds,
};

/// Replays canned verdicts and records every request it receives.
#[derive(Default)]
struct ScriptedArbiter {
    replies: RefCell<VecDeque<Result<ArbitrationVerdict, ArbitrationError>>>,
    requests: RefCell<Vec<ArbitrationRequest>>,
    calls: Cell<usize>,
}

impl ScriptedArbiter {
    fn with(replies: Vec<Result<ArbitrationVerdict, ArbitrationError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            ..Self::default()
        }
    }
}

impl Arbiter for ScriptedArbiter {
    fn arbitrate(&self, request: &ArbitrationRequest) -> Result<ArbitrationVerdict, ArbitrationError> {
        self.calls.set(self.calls.get() + 1);
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ArbitrationError::Unavailable("no scripted reply".to_string())))
    }
}

fn day1() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn day2() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
}

/// Wide ambiguous band so partial overlaps always go to arbitration.
fn wide_config() -> ResolutionConfig {
    ResolutionConfig {
        thresholds: Thresholds {
            high: -0.1,
            low: -0.9,
        },
        ..ResolutionConfig::default()
    }
}

fn breach() -> Candidate {
    Candidate::new(
        "cand-breach",
        "Ransomware group X breaches Company Y",
        "Ransomware group X claimed a breach of Company Y and leaked customer records.",
        "The group posted samples of stolen files on its leak site on Monday.",
    )
}

fn breach_repost() -> Candidate {
    Candidate::new(
        "cand-breach-repost",
        "Ransomware group X breaches Company Y",
        "Ransomware group X claimed a breach of Company Y and leaked customer records.",
        "Samples of the stolen files appeared on the leak site.",
    )
}

fn ransom_followup() -> Candidate {
    Candidate::new(
        "cand-ransom",
        "Ransomware group X breaches Company Y, demands ransom",
        "Ransomware group X claimed a breach of Company Y and demanded a ransom of 40 BTC.",
        "The company said attackers set a seven day deadline.",
    )
}

fn phishing() -> Candidate {
    Candidate::new(
        "cand-phishing",
        "Phishing campaign targets European banks",
        "A large phishing campaign is impersonating bank support desks across Europe.",
        "Researchers observed thousands of lure emails.",
    )
}

fn vpn_flaw() -> Candidate {
    let mut candidate = Candidate::new(
        "cand-vpn",
        "Critical flaw patched in popular VPN appliance",
        "Vendor Z released fixes for an authentication bypass in its VPN gateway.",
        "Administrators should upgrade immediately.",
    );
    candidate.severity = Severity::Critical;
    candidate
}

fn merge_verdict() -> ArbitrationVerdict {
    ArbitrationVerdict::Merge {
        reasoning: "Adds the ransom amount and deadline.".to_string(),
        target_article_id: None,
        content: MergeContent {
            summary: "Ransom demand disclosed".to_string(),
            content: "The group demanded 40 BTC with a seven day deadline.".to_string(),
            sources: vec!["https://example.com/ransom".to_string()],
            severity: Some(Severity::High),
        },
    }
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

fn seed(conn: &mut Connection, pipeline: &ResolutionPipeline<&ScriptedArbiter>) {
    let summary = pipeline
        .ingest_batch(conn, &CandidateBatch::new(day1(), vec![breach(), phishing()]))
        .unwrap();
    assert_eq!(summary.new, 2);
}

#[test]
fn first_batch_on_empty_index_is_all_new() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);

    let summary = pipeline
        .ingest_batch(
            &mut conn,
            &CandidateBatch::new(day1(), vec![breach(), phishing(), vpn_flaw()]),
        )
        .unwrap();

    assert_eq!(summary.new, 3);
    assert_eq!(summary.failures, Vec::new());
    assert!(!summary.has_unresolved());
    assert_eq!(arbiter.calls.get(), 0);
    assert_eq!(pipeline.index().len(&conn).unwrap(), 3);

    let records = SqliteCandidateRepository::try_new(&conn)
        .unwrap()
        .list_for_date(day1())
        .unwrap();
    let first = &records[0];
    assert_eq!(first.candidate_id, "cand-breach");
    assert_eq!(first.resolution, Some(Resolution::New));
    assert_eq!(
        first.reasoning.as_ref().map(|reasoning| reasoning.source),
        Some(ReasoningSource::EmptyIndex)
    );
}

#[test]
fn near_identical_candidate_is_auto_duplicate_without_arbitration() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day1(), vec![breach()]))
        .unwrap();

    let summary = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day2(), vec![breach_repost()]))
        .unwrap();

    assert_eq!(summary.duplicate_auto, 1);
    assert_eq!(arbiter.calls.get(), 0);
    assert_eq!(count(&conn, "articles"), 1);
    assert_eq!(pipeline.index().len(&conn).unwrap(), 1);

    let candidates = SqliteCandidateRepository::try_new(&conn).unwrap();
    let record = candidates.get_record("cand-breach-repost").unwrap().unwrap();
    assert_eq!(record.resolution, Some(Resolution::DuplicateAuto));
    assert!(record.similarity_score.unwrap() <= config.thresholds.low);

    let articles = SqliteArticleRepository::try_new(&conn).unwrap();
    let canonical = articles.get_by_candidate("cand-breach").unwrap().unwrap();
    assert_eq!(record.article_id, Some(canonical.id));
    assert!(matches!(
        articles.get_by_candidate("cand-breach-repost"),
        Err(RepoError::RedirectRequired { article_id, .. }) if article_id == canonical.id
    ));
}

#[test]
fn intra_batch_duplicate_is_caught_against_earlier_sibling() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);

    let summary = pipeline
        .ingest_batch(
            &mut conn,
            &CandidateBatch::new(day1(), vec![breach(), breach_repost()]),
        )
        .unwrap();

    assert_eq!(summary.new, 1);
    assert_eq!(summary.duplicate_auto, 1);
    assert_eq!(pipeline.index().len(&conn).unwrap(), 1);

    let publication = SqlitePublicationRepository::try_new(&conn)
        .unwrap()
        .get_publication(day1())
        .unwrap()
        .unwrap();
    assert_eq!(publication.article_ids.len(), 1);
    assert_eq!(publication.headline, "Ransomware group X breaches Company Y");
}

#[test]
fn ambiguous_merge_appends_update_and_redirects_candidate() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::with(vec![Ok(merge_verdict())]);
    let config = wide_config();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    seed(&mut conn, &pipeline);

    let summary = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day2(), vec![ransom_followup()]))
        .unwrap();

    assert_eq!(summary.merged, 1);
    assert_eq!(arbiter.calls.get(), 1);
    assert_eq!(count(&conn, "articles"), 2);
    assert_eq!(pipeline.index().len(&conn).unwrap(), 2);

    let articles = SqliteArticleRepository::try_new(&conn).unwrap();
    let canonical = articles.get_by_candidate("cand-breach").unwrap().unwrap();
    assert_eq!(arbiter.requests.borrow()[0].matches[0].article_id, canonical.id);
    assert!(canonical.has_updates);
    assert_eq!(canonical.update_count, 1);
    assert_eq!(canonical.severity, Severity::High);

    let updates = articles.list_updates(canonical.id).unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].source_candidate_id, "cand-ransom");
    assert_eq!(updates[0].summary, "Ransom demand disclosed");

    let resolved = articles.lookup("cand-ransom").unwrap().unwrap();
    assert_eq!(resolved.article.id, canonical.id);
    assert_eq!(resolved.article.slug, canonical.slug);
    assert_eq!(
        resolved.via,
        LookupPath::Redirect {
            candidate_id: "cand-ransom".to_string(),
            resolution: Resolution::Merged,
        }
    );

    let record = SqliteCandidateRepository::try_new(&conn)
        .unwrap()
        .get_record("cand-ransom")
        .unwrap()
        .unwrap();
    assert_eq!(record.resolution, Some(Resolution::Merged));
    assert_eq!(record.article_id, Some(canonical.id));
    let reasoning = record.reasoning.unwrap();
    assert_eq!(reasoning.source, ReasoningSource::Arbitration);
    assert_eq!(
        reasoning.arbiter_reasoning.as_deref(),
        Some("Adds the ransom amount and deadline.")
    );

    let publication = SqlitePublicationRepository::try_new(&conn)
        .unwrap()
        .get_publication(day2())
        .unwrap()
        .unwrap();
    assert!(publication.article_ids.is_empty());
    assert_eq!(publication.headline, "No new stories for 2026-03-03");
}

#[test]
fn arbiter_new_verdict_publishes_with_override() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::with(vec![Ok(ArbitrationVerdict::New {
        reasoning: "Different incident at a subsidiary.".to_string(),
    })]);
    let config = wide_config();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    seed(&mut conn, &pipeline);

    let summary = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day2(), vec![ransom_followup()]))
        .unwrap();

    assert_eq!(summary.new, 1);
    let article = SqliteArticleRepository::try_new(&conn)
        .unwrap()
        .get_by_candidate("cand-ransom")
        .unwrap()
        .unwrap();
    let reasoning = article.reasoning.unwrap();
    assert!(reasoning.override_new);
    assert!(article.matched_article_id.is_some());
    assert_eq!(pipeline.index().len(&conn).unwrap(), 3);
}

#[test]
fn arbitration_failure_is_isolated_and_retryable() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::with(vec![
        Err(ArbitrationError::Timeout),
        Ok(ArbitrationVerdict::Duplicate {
            reasoning: "Same breach, no new facts.".to_string(),
            target_article_id: None,
        }),
    ]);
    let config = wide_config();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    seed(&mut conn, &pipeline);

    let batch = CandidateBatch::new(day2(), vec![ransom_followup(), vpn_flaw()]);
    let summary = pipeline.ingest_batch(&mut conn, &batch).unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.new, 1);
    assert!(summary.has_unresolved());
    assert_eq!(summary.failures[0].candidate_id, "cand-ransom");
    assert_eq!(summary.failures[0].stage, FailureStage::Arbitrate);

    let candidates = SqliteCandidateRepository::try_new(&conn).unwrap();
    let record = candidates.get_record("cand-ransom").unwrap().unwrap();
    assert_eq!(record.status, CandidateStatus::Failed);
    assert_eq!(record.resolution, None);
    assert_eq!(record.article_id, None);
    assert_eq!(record.attempts, 1);
    assert!(record.last_error.unwrap().contains("timed out"));
    drop(candidates);

    let publication = SqlitePublicationRepository::try_new(&conn)
        .unwrap()
        .get_publication(day2())
        .unwrap()
        .unwrap();
    assert_eq!(publication.article_ids.len(), 1);
    assert_eq!(publication.headline, "Critical flaw patched in popular VPN appliance");

    let err = pipeline.ingest_batch(&mut conn, &batch).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnresolvedCandidates { date, count: 1 } if date == day2()
    ));

    let retried = pipeline.retry_unresolved(&mut conn, day2()).unwrap();
    assert_eq!(retried.processed, 1);
    assert_eq!(retried.duplicate_confirmed, 1);
    assert!(!retried.has_unresolved());

    let record = SqliteCandidateRepository::try_new(&conn)
        .unwrap()
        .get_record("cand-ransom")
        .unwrap()
        .unwrap();
    assert_eq!(record.status, CandidateStatus::Resolved);
    assert_eq!(record.resolution, Some(Resolution::DuplicateConfirmed));
    assert_eq!(record.attempts, 2);
    assert_eq!(count(&conn, "articles"), 3);
}

#[test]
fn reingesting_resolved_candidates_is_a_no_op() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    let batch = CandidateBatch::new(day1(), vec![breach(), breach_repost()]);
    pipeline.ingest_batch(&mut conn, &batch).unwrap();
    let articles_before = count(&conn, "articles");

    let summary = pipeline.ingest_batch(&mut conn, &batch).unwrap();

    assert_eq!(summary.already_resolved, 2);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.resolved(), 0);
    assert_eq!(count(&conn, "articles"), articles_before);
    assert_eq!(count(&conn, "candidates"), 2);
    assert_eq!(pipeline.index().len(&conn).unwrap(), 1);
}

#[test]
fn precondition_failures_abort_before_any_write() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);

    let err = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day1(), Vec::new()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyBatch { date } if date == day1()));

    let mut misdated = breach();
    misdated.date = Some(day2());
    let err = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day1(), vec![misdated]))
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidBatch { .. }));
    assert!(err.to_string().contains("2026-03-02"));
    assert_eq!(count(&conn, "candidates"), 0);
}

#[test]
fn corrupted_index_halts_batch_until_rebuilt() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day1(), vec![breach()]))
        .unwrap();

    conn.execute_batch("DELETE FROM articles_fts;").unwrap();
    let batch = CandidateBatch::new(day2(), vec![breach_repost()]);
    let err = pipeline.ingest_batch(&mut conn, &batch).unwrap_err();
    assert!(matches!(err, PipelineError::IndexCorrupted { date, .. } if date == day2()));
    assert!(err.to_string().contains("2026-03-03"));
    assert_eq!(count(&conn, "candidates"), 1);

    let (index, report) = pipeline.into_index().rebuild(&mut conn).unwrap();
    assert_eq!(report.indexed, 1);
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    let summary = pipeline.ingest_batch(&mut conn, &batch).unwrap();
    assert_eq!(summary.duplicate_auto, 1);
}

#[test]
fn publication_regeneration_is_idempotent() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    pipeline
        .ingest_batch(
            &mut conn,
            &CandidateBatch::new(day1(), vec![breach(), vpn_flaw(), breach_repost()]),
        )
        .unwrap();

    let publications = SqlitePublicationRepository::try_new(&conn).unwrap();
    let first = publications.get_publication(day1()).unwrap().unwrap();
    drop(publications);

    let outcome = pipeline.regenerate(&mut conn, day1()).unwrap();
    assert!(!outcome.changed);
    let second = SqlitePublicationRepository::try_new(&conn)
        .unwrap()
        .get_publication(day1())
        .unwrap()
        .unwrap();
    assert_eq!(first, second);

    assert_eq!(second.article_ids.len(), 2);
    assert_eq!(
        second.headline,
        "Critical flaw patched in popular VPN appliance (+1 more)"
    );
    assert_eq!(
        second.summary,
        "[CRITICAL] Critical flaw patched in popular VPN appliance\n[MEDIUM] Ransomware group X breaches Company Y"
    );
}

#[test]
fn reapplying_a_committed_decision_is_idempotent_and_conflicts_are_rejected() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day1(), vec![breach()]))
        .unwrap();

    let candidate = breach_repost();
    let classification = SimilarityClassifier::new(pipeline.index(), config.thresholds)
        .classify(&conn, &candidate)
        .unwrap();
    let decision = decide_from_score(&classification).unwrap();
    let applier = ResolutionApplier::new(pipeline.index());

    let first = applier.apply(&mut conn, day2(), &candidate, &decision).unwrap();
    assert!(first.changed);
    assert_eq!(first.resolution, Resolution::DuplicateAuto);

    let second = applier.apply(&mut conn, day2(), &candidate, &decision).unwrap();
    assert!(!second.changed);
    assert_eq!(second.article_id, first.article_id);

    let mut conflicting = decision.clone();
    conflicting.action = DecisionAction::Publish;
    let err = applier
        .apply(&mut conn, day2(), &candidate, &conflicting)
        .unwrap_err();
    assert!(matches!(
        err,
        ApplyError::AlreadyResolved {
            committed: Resolution::DuplicateAuto,
            attempted: Resolution::New,
            ..
        }
    ));
    assert_eq!(count(&conn, "articles"), 1);
    assert_eq!(count(&conn, "candidates"), 2);
}

#[test]
fn severity_changing_merge_refreshes_the_target_publication() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::with(vec![Ok(merge_verdict())]);
    let config = wide_config();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    seed(&mut conn, &pipeline);

    let summary = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day2(), vec![ransom_followup()]))
        .unwrap();

    assert_eq!(summary.merged, 1);
    assert_eq!(summary.refreshed_dates, vec![day1()]);

    let first_day = SqlitePublicationRepository::try_new(&conn)
        .unwrap()
        .get_publication(day1())
        .unwrap()
        .unwrap();
    assert_eq!(
        first_day.summary,
        "[HIGH] Ransomware group X breaches Company Y\n[MEDIUM] Phishing campaign targets European banks"
    );

    let outcome = pipeline.regenerate(&mut conn, day1()).unwrap();
    assert!(!outcome.changed);
}

#[test]
fn verdict_targeting_an_article_that_was_not_offered_fails_the_candidate() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = wide_config();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    seed(&mut conn, &pipeline);

    let phishing_id = SqliteArticleRepository::try_new(&conn)
        .unwrap()
        .get_by_candidate("cand-phishing")
        .unwrap()
        .unwrap()
        .id;
    arbiter
        .replies
        .borrow_mut()
        .push_back(Ok(ArbitrationVerdict::Duplicate {
            reasoning: "Same campaign.".to_string(),
            target_article_id: Some(phishing_id),
        }));

    let summary = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day2(), vec![ransom_followup()]))
        .unwrap();

    assert_eq!(arbiter.calls.get(), 1);
    assert!(!arbiter.requests.borrow()[0]
        .offered_ids()
        .contains(&phishing_id));
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.duplicate_confirmed, 0);
    assert_eq!(summary.failures[0].stage, FailureStage::Arbitrate);

    let record = SqliteCandidateRepository::try_new(&conn)
        .unwrap()
        .get_record("cand-ransom")
        .unwrap()
        .unwrap();
    assert_eq!(record.status, CandidateStatus::Failed);
    assert_eq!(record.resolution, None);
    assert_eq!(record.article_id, None);
    assert!(record.last_error.unwrap().contains("not offered"));
}

#[test]
fn unreadable_match_fails_only_that_candidate() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = wide_config();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    seed(&mut conn, &pipeline);
    conn.execute(
        "UPDATE articles SET tags = 'not json' WHERE source_candidate_id = 'cand-breach';",
        [],
    )
    .unwrap();

    let summary = pipeline
        .ingest_batch(
            &mut conn,
            &CandidateBatch::new(day2(), vec![ransom_followup(), vpn_flaw()]),
        )
        .unwrap();

    assert_eq!(arbiter.calls.get(), 0);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.new, 1);
    assert_eq!(summary.failures[0].candidate_id, "cand-ransom");
    assert_eq!(summary.failures[0].stage, FailureStage::Arbitrate);

    let record = SqliteCandidateRepository::try_new(&conn)
        .unwrap()
        .get_record("cand-ransom")
        .unwrap()
        .unwrap();
    assert_eq!(record.status, CandidateStatus::Failed);
    assert!(record.last_error.unwrap().contains("invalid json"));
}

#[test]
fn reconfigured_thresholds_apply_to_the_next_batch() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let mut pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    seed(&mut conn, &pipeline);

    let recalibrated = ResolutionConfig {
        thresholds: Thresholds {
            high: -0.5,
            low: -0.9,
        },
        ..ResolutionConfig::default()
    };
    pipeline.reconfigure(&recalibrated);

    let summary = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day2(), vec![ransom_followup()]))
        .unwrap();

    assert_eq!(summary.new, 1);
    assert_eq!(arbiter.calls.get(), 0);
    let reasoning = SqliteCandidateRepository::try_new(&conn)
        .unwrap()
        .get_record("cand-ransom")
        .unwrap()
        .unwrap()
        .reasoning
        .unwrap();
    assert_eq!(reasoning.high_threshold, -0.5);
    assert_eq!(reasoning.low_threshold, -0.9);
}

#[test]
fn stop_word_headline_still_matches_on_body_terms() {
    let mut conn = open_db_in_memory().unwrap();
    let arbiter = ScriptedArbiter::default();
    let config = ResolutionConfig::default();
    let index = CorpusIndex::open(&conn, config.index.clone()).unwrap();
    let pipeline = ResolutionPipeline::new(index, &config, &arbiter);
    let original = Candidate::new(
        "cand-vague",
        "What it was",
        "It is",
        "Ransomware crippled hospital systems across Ohio overnight.",
    );
    pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day1(), vec![original]))
        .unwrap();

    let repost = Candidate::new(
        "cand-vague-repost",
        "What it was",
        "It is",
        "Ransomware crippled hospital systems across Ohio overnight.",
    );
    let summary = pipeline
        .ingest_batch(&mut conn, &CandidateBatch::new(day2(), vec![repost]))
        .unwrap();

    assert_eq!(summary.duplicate_auto, 1);
    assert_eq!(count(&conn, "articles"), 1);
}
