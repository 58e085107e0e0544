#[cfg(test)]
mod tests {
    use collocate::*;
    use itertools::Itertools;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const REFUGEES: DiscoursemeId = DiscoursemeId(1);
    const PLACE: DiscoursemeId = DiscoursemeId(2);
    const CRISIS: DiscoursemeId = DiscoursemeId(3);

    // sentences of five tokens, two texts of two sentences each
    fn engine() -> Engine {
        let words = "refugees arrive at the border \
                     the border is closed now \
                     refugees wait at the border \
                     crisis talks on refugees today"
            .split_whitespace()
            .map(String::from)
            .collect_vec();
        let provider = InMemoryProvider::new(ProviderConfig::default());
        provider
            .insert(CorpusData {
                id: "news".into(),
                p_attributes: BTreeMap::from([("word".into(), words)]),
                s_attributes: BTreeMap::from([
                    (
                        "s".into(),
                        (0..4)
                            .map(|i| Region::new(Span::new(i * 5, i * 5 + 4)))
                            .collect(),
                    ),
                    (
                        "text".into(),
                        vec![
                            Region::new(Span::new(0, 9)).with("date", "2020-01-15"),
                            Region::new(Span::new(10, 19)).with("date", "2020-02-03"),
                        ],
                    ),
                ]),
            })
            .unwrap();
        Engine::new(Arc::new(provider), EngineConfig::default()).unwrap()
    }

    fn constellation() -> Constellation {
        Constellation {
            id: 1,
            name: "migration".into(),
            focus: Some(REFUGEES),
            discoursemes: vec![
                Discourseme::with_items(REFUGEES, "refugees", ["refugees"]),
                Discourseme::with_items(PLACE, "place", ["border", "the", "at"]),
                Discourseme::with_items(CRISIS, "crisis", ["crisis"]),
            ],
        }
    }

    fn request() -> CollocationRequest {
        CollocationRequest::new("news", REFUGEES, "word", "s", 3)
    }

    #[tokio::test]
    async fn partition_covers_every_text_once() {
        let engine = engine();
        let collection = engine
            .partition("news", "text", "date", Interval::Month)
            .await
            .unwrap();

        assert_eq!(
            collection.members.iter().map(|m| m.label.as_str()).collect_vec(),
            vec!["2020-01", "2020-02"]
        );
        let spans = collection.subcorpora().map(|s| s.spans().clone()).collect_vec();
        assert!(spans[0].intersection(&spans[1]).is_empty());
        assert_eq!(spans.iter().map(SpanSet::len).sum::<usize>(), 20);
    }

    #[tokio::test]
    async fn global_marginals_ignore_the_subcorpus() {
        let engine = engine();
        let collection = engine
            .partition("news", "text", "date", Interval::Month)
            .await
            .unwrap();
        let january = collection.members[0].subcorpus.id;

        let mut local = request();
        local.subcorpus_id = Some(january);
        let mut global = local.clone();
        global.marginals = Marginals::Global;

        let local = engine.collocation(&constellation(), &local).await.unwrap();
        let global = engine.collocation(&constellation(), &global).await.unwrap();
        assert_eq!((local.n, global.n), (10, 20));
        assert_eq!(local.context_size, global.context_size);

        let the = |a: &CollocationAnalysis| a.item("the").map(|r| r.table).unwrap();
        assert_eq!((the(&local).o11, the(&local).c1), (1, 2));
        assert_eq!((the(&global).o11, the(&global).c1), (1, 3));
        for row in global.items.iter() {
            assert!(row.table.o11 <= row.table.c1);
            assert_eq!(row.table.r1, global.context_size);
        }
    }

    #[tokio::test]
    async fn discourseme_row_sums_its_items() {
        let engine = engine();
        let analysis = engine.collocation(&constellation(), &request()).await.unwrap();
        assert_eq!(analysis.context_size, 10);

        let place = analysis.discourseme(PLACE).unwrap();
        assert_eq!(place.global.table.c1, 8);
        assert_eq!(place.global.table.o11, 4);
        assert_eq!(
            place.items.iter().map(|r| r.table.c1).sum::<u64>(),
            place.global.table.c1
        );
        assert_eq!(
            place.items.iter().map(|r| r.table.o11).sum::<u64>(),
            place.global.table.o11
        );
    }

    #[tokio::test]
    async fn identical_requests_share_an_analysis() {
        let engine = engine();
        let first = engine.collocation(&constellation(), &request()).await.unwrap();
        let second = engine.collocation(&constellation(), &request()).await.unwrap();
        assert_eq!(first.id, second.id);

        let mut wider = request();
        wider.window = 4;
        let other = engine.collocation(&constellation(), &wider).await.unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(engine.analysis(other.id).unwrap().id(), other.id);
    }

    #[tokio::test]
    async fn pages_follow_the_ranking() {
        let engine = engine();
        let ranking = Ranking {
            sort_by: SortKey::Count(CountField::O11),
            order: SortOrder::Descending,
        };
        let view = engine
            .build_collocation(&constellation(), &request(), ranking, Page::new(1, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(view.items.rows.len(), 2);
        assert_eq!(
            view.items.rows.iter().map(|r| r.item.as_str()).collect_vec(),
            vec!["at", "the"]
        );
        assert_eq!(view.items.page_count, (view.items.nr_items + 1) / 2);
    }

    #[tokio::test]
    async fn recreated_maps_keep_their_predecessors() {
        let engine = engine();
        let analysis = engine.collocation(&constellation(), &request()).await.unwrap();

        let map = engine.semantic_map(analysis.id).await.unwrap();
        assert_eq!(engine.semantic_map(analysis.id).await.unwrap().id, map.id);
        engine.set_user_coordinate(map.id, PLACE, 0.25, 0.75).unwrap();

        let recreated = engine.recreate_semantic_map(analysis.id).await.unwrap();
        assert_ne!(recreated.id, map.id);
        assert_eq!(engine.semantic_map(analysis.id).await.unwrap().id, recreated.id);

        engine.set_user_coordinate(recreated.id, PLACE, -1.0, -1.0).unwrap();
        let old = engine.map_coordinates(map.id).unwrap();
        let place = old
            .discoursemes
            .iter()
            .find(|d| d.discourseme_id == PLACE)
            .unwrap();
        assert_eq!((place.x_user, place.y_user), (Some(0.25), Some(0.75)));
        assert_eq!(old.items, map.items().to_vec());
    }

    #[tokio::test]
    async fn more_filters_never_add_lines() {
        let engine = engine();
        let constellation = constellation();
        let scope = engine.scope("news", None).unwrap();
        let focus = engine
            .describe(&constellation.discoursemes[0], &scope, "s", "word")
            .await
            .unwrap();

        let mut nr_lines = Vec::new();
        for filter in [vec![], vec![PLACE], vec![PLACE, CRISIS]] {
            let mut request = ConcordanceRequest::new("word", "s", 3);
            request.filter_discourseme_ids = filter;
            let concordance = engine
                .build_concordance(&scope, &focus.spans(), &constellation.discoursemes, &request)
                .await
                .unwrap();
            nr_lines.push(concordance.nr_lines);
        }
        assert_eq!(nr_lines[..2], [3, 2]);
        assert!(nr_lines[2] <= nr_lines[1]);
    }
}
