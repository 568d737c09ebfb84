/// Label used when the model reports a class outside the label list.
pub const UNKNOWN_LABEL: &str = "Desconhecido";

/// COCO class names in Portuguese, indexed by the model's class output.
pub const COCO_PT: [&str; 91] = [
    "pessoa", "bicicleta", "carro", "moto", "aviao", "onibus", "trem", "caminhao", "barco",
    "semaforo", "hidrante", "sinal de transito", "placa de pare", "parquimetro", "banco",
    "passaro", "gato", "cachorro", "cavalo", "ovelha", "vaca", "elefante", "urso", "zebra",
    "girafa", "chapeu", "mochila", "guarda-chuva", "sapato", "oculos", "bolsa", "gravata", "mala",
    "frisbee", "esquis", "snowboard", "bola de esporte", "pipa", "taco de beisebol",
    "luva de beisebol", "skate", "prancha de surfe", "Raquete de tenis", "garrafa", "prato",
    "taca de vinho", "copo", "garfo", "faca", "colher", "tigela", "banana", "maca", "sanduiche",
    "laranja", "brocolis", "cenoura", "cachorro-quente", "pizza", "donut", "bolo", "cadeira",
    "sofa", "planta em vaso", "cama", "espelho", "mesa de jantar", "janela", "mesa",
    "vaso sanitario", "porta", "TV", "laptop", "mouse", "controle remoto", "teclado", "celular",
    "micro-ondas", "forno", "torradeira", "pia", "geladeira", "liquidificador", "livro",
    "relogio", "vaso", "tesoura", "ursinho de pelucia", "secador de cabelo", "escova de dentes",
    "escova de cabelo",
];

#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new(labels: Vec<String>) -> Self {
        LabelMap { labels }
    }

    pub fn coco_pt() -> Self {
        Self::new(COCO_PT.iter().map(|label| label.to_string()).collect())
    }

    /// Looks up a class index as emitted by the model (a float).
    pub fn label(&self, class: f32) -> &str {
        if !class.is_finite() || class < 0.0 {
            return UNKNOWN_LABEL;
        }

        self.labels
            .get(class as usize)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::coco_pt()
    }
}
