/// Literal the reduce prompt asks for in place of any missing field.
#[cfg(test)]
const MISSING_FIELD_PLACEHOLDER: &str = "Não informado";

pub const MAP_PROMPT: &str = "Você é um analista de conversas. Receberá um trecho de mensagens de um grupo de WhatsApp em português.

Para cada trecho:
1. Extraia os fatos principais.
2. Identifique decisões confirmadas, responsáveis e prazos se existirem.
3. Liste perguntas ou bloqueios que ficaram em aberto.

Responda usando o formato abaixo em português claro:
Resumo: frase única descrevendo o trecho.
Decisões: bullet points começando com \"-\" (use \"Nenhuma\" se não houver).
Pendências: bullet points começando com \"-\" (use \"Nenhuma\" se não houver).
";

pub const REDUCE_PROMPT: &str = "Você é responsável por consolidar o resumo de um grupo de WhatsApp em português.

Você receberá resumos parciais numerados (\"Trecho N\") em ordem cronológica e, ao final, as estatísticas do período em JSON. Use as estatísticas como fonte exata de números, horários, participantes e links; não invente valores.

Regras:
- O resultado deve soar como se fosse escrito por um colega humano.
- Seja sucinto e objetivo.
- Mantenha exatamente as seções e a ordem abaixo, mesmo que alguma fique vazia.
- Quando um campo não tiver informação, escreva \"Não informado\" em vez de omiti-lo.

Formate a resposta exatamente assim:
Métricas Executivas:
- Total de mensagens: <número>
- Participantes únicos: <número>
- Mais ativos: <nome (mensagens)>, ...
- Horário de pico: <faixa (mensagens)>

Principais Assuntos:
- Bullet por assunto relevante, com decisões e responsáveis entre parênteses.

Atividade por Período:
- Madrugada: <resumo ou \"Não informado\">
- Manhã: <resumo ou \"Não informado\">
- Início da tarde: <resumo ou \"Não informado\">
- Fim da tarde: <resumo ou \"Não informado\">
- Noite: <resumo ou \"Não informado\">

Links Compartilhados:
- <url> (por <remetente>): <contexto>. Use \"- Não informado\" se não houver.

Observações Notáveis:
- Pendências, próximos passos ou contexto extra. Use \"- Não informado\" se não houver.
";

/// User content for the reduce call: numbered partials, then the stats JSON.
pub fn build_reduce_input(partials: &[String], stats_json: &str) -> String {
    let mut out = partials
        .iter()
        .enumerate()
        .map(|(idx, summary)| format!("Trecho {}:\n{}", idx + 1, summary))
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push_str("\n\nEstatísticas do período (JSON):\n");
    out.push_str(stats_json);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_prompt_names_every_section_and_placeholder() {
        for section in [
            "Métricas Executivas:",
            "Principais Assuntos:",
            "Atividade por Período:",
            "Links Compartilhados:",
            "Observações Notáveis:",
        ] {
            assert!(REDUCE_PROMPT.contains(section), "{section}");
        }
        assert!(REDUCE_PROMPT.contains(MISSING_FIELD_PLACEHOLDER));
    }

    #[test]
    fn reduce_input_numbers_partials_by_position() {
        let input = build_reduce_input(&["a".to_string(), "b".to_string()], "{}");
        assert!(input.starts_with("Trecho 1:\na\n\nTrecho 2:\nb"));
        assert!(input.ends_with("(JSON):\n{}"));
    }
}
